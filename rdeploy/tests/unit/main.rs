//! Crate-level unit tests

mod test_fsm;
mod test_ignore;
mod test_progress;
mod test_store;
