pub mod init;
pub mod inspect;
pub mod run;
pub mod sessions;
pub mod validate;
