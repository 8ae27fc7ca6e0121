mod keys;

pub use keys::{cmd_issue_key, cmd_issue_keys};
