//! CWMP（TR-069）会话引擎。
//!
//! 终结拉取式 HTTP+SOAP 协议：信封编解码（[`xml`] / [`soap`] /
//! [`rpc`]）、带服务端 RPC 排队的会话状态机（[`session`] /
//! [`acs`]）、设备侧 HTTP 认证（[`auth`]）与连接请求回调
//! （[`connreq`]）。

pub mod acs;
pub mod auth;
pub mod connreq;
pub mod error;
pub mod rpc;
pub mod session;
pub mod soap;
pub mod xml;

pub use acs::{AcsConfig, AcsRequest, AcsResponse, AcsService, SESSION_COOKIE};
pub use auth::AuthMode;
pub use connreq::ConnectionRequester;
pub use error::{fault_codes, CwmpError};
pub use rpc::{AcsRpc, DownloadArgs, UploadArgs};
pub use session::{RpcOutcome, SessionState};
pub use soap::{event_codes, CpeMessage, Envelope, Inform, ParameterValue};
