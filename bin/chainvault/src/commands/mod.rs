//! Contains subcommands for the chainvault binary.

mod node;
pub(crate) use node::NodeCommand;

mod status;
pub(crate) use status::StatusCommand;
