pub mod clock;
pub mod cloud;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod migration;
pub mod player;
pub mod root;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;
pub mod validator;
pub mod value;
