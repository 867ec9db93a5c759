pub mod home;
pub mod url;
