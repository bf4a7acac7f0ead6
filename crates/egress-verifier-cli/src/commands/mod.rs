//! CLI subcommands

pub mod egress;
