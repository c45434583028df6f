// Transport layer - upstream collaborators
// JSON-RPC node access and the Safe transaction service relay.

pub mod jsonrpc;
pub mod relay;

pub use jsonrpc::{EthRpc, RpcRegistry};
pub use relay::RelayClient;
