//! Outbound HTTP plumbing: the client trait, the interceptor decorator,
//! blocker classification, and the OS link signal.

mod classify;
mod http;
mod interceptor;
mod link;

pub use classify::{FailureClass, FailureClassifier, FailureInfo, SignatureClassifier};
pub use http::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};
pub use interceptor::RequestInterceptor;
pub use link::{LinkWatcher, TcpLinkProbe};
