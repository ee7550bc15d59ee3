#![doc = include_str!("../../README.MD")]

pub mod bitbuf;
pub mod codec;
pub mod diagnostics;
pub mod items;
pub mod layout;
pub mod policy;
pub mod props;
pub mod schema;
pub mod stash;
