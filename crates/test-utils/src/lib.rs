//! Test doubles shared by the MyPersona crates.

pub mod fixtures;
pub mod ledger;
pub mod rpc;

pub use ledger::{FakeLedger, FakeWallet, SendFault};
pub use rpc::{MockRpc, RpcReply, RpcRequest};
