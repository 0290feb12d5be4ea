pub mod init;
pub mod inspect;
pub mod shell;
