//! Utility modules for dlg-voice

pub mod db_retry;

pub use db_retry::retry_on_lock;
