//! # Reporter 集成模块
//!
//! 提供与 Google Workspace 的集成功能，包括：
//! - Drive/Docs 文档操作（新建、复制、移动、读取名称）
//! - 占位符批量替换请求
//! - OAuth2 授权链接、授权码换取与令牌刷新

pub mod google;
pub mod oauth;
pub mod placeholders;

pub use google::{DocumentService, GoogleEndpoints, GoogleWorkspaceClient, GOOGLE_DOC_MIME_TYPE};
pub use oauth::{OAuthClient, OAuthSettings, DEFAULT_SCOPES};
pub use placeholders::Placeholders;
