//! リクエストディスパッチ境界
//!
//! ハンドラーの実行結果を応答へ変換する。ハンドラーのエラーは
//! ステータス付きで描画し、パニック（二重書き込み等の誤用）は
//! この境界で捕捉して素の500へ変換する。影響は当該リクエストの
//! 実行単位に限られ、プロセス全体には波及しない。

use std::any::Any;

use futures::FutureExt;
use log::{error, warn};

use crate::common::http::StatusCode;
use crate::common::traits::Service;
use crate::context::Context;

/// ハンドラーを実行し、結果を応答へ書き込む
///
/// ハンドラーが既に応答を書き込んでいた場合、返された結果は
/// 破棄される。
pub async fn dispatch<S: Service + ?Sized>(service: &S, ctx: &mut Context) {
    let outcome = std::panic::AssertUnwindSafe(service.handle(ctx))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(reply)) => {
            if ctx.response().written() {
                return;
            }
            if let Err(e) = ctx.response_mut().write_any(reply) {
                error!("Failed to write handler reply: {}", e);
                if !ctx.response().written() {
                    ctx.response_mut()
                        .abort(StatusCode::InternalServerError.as_u16());
                }
            }
        }
        Ok(Err(e)) => {
            warn!("Handler returned error: {}", e);
            if ctx.response().written() {
                return;
            }
            let status = e.status_code();
            if let Err(we) = ctx.response_mut().write(status, e.to_string()) {
                error!("Failed to write handler error: {}", we);
                ctx.response_mut()
                    .abort(StatusCode::InternalServerError.as_u16());
            }
        }
        Err(panic) => {
            // 誤用によるパニックは内部欠陥であり、クライアントへは
            // 構造化された内容を返さない
            error!(
                "Handler panicked, aborting request with 500: {}",
                panic_message(&panic)
            );
            ctx.response_mut()
                .abort(StatusCode::InternalServerError.as_u16());
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::common::http::{MemoryRequest, Method, SharedResponse};
    use crate::context::response::Reply;
    use crate::error::Error;
    use crate::router::Routers;

    fn new_ctx(req: MemoryRequest) -> (Context, SharedResponse) {
        let shared = SharedResponse::new();
        let table = Routers::default();
        let ctx = Context::new(Box::new(req), Box::new(shared.clone()), &table).unwrap();
        (ctx, shared)
    }

    struct EchoService;

    #[async_trait]
    impl Service for EchoService {
        async fn handle(&self, ctx: &mut Context) -> Result<Reply, Error> {
            let name = ctx.request().get_string("name", "anonymous");
            Ok(Reply::Value(json!({ "hello": name })))
        }
    }

    struct CheckedService;

    #[async_trait]
    impl Service for CheckedService {
        async fn handle(&self, ctx: &mut Context) -> Result<Reply, Error> {
            ctx.request().check(&["email"])?;
            Ok(Reply::Value(json!({})))
        }
    }

    struct DoubleWriteService;

    #[async_trait]
    impl Service for DoubleWriteService {
        async fn handle(&self, ctx: &mut Context) -> Result<Reply, Error> {
            ctx.response_mut().write(200, "first")?;
            ctx.response_mut().write(200, "second")?;
            Ok(Reply::Value(json!(null)))
        }
    }

    #[tokio::test]
    async fn test_dispatch_writes_reply() {
        let req = MemoryRequest::new(Method::GET, "/hello").with_query_string("name=Alice");
        let (mut ctx, shared) = new_ctx(req);

        dispatch(&EchoService, &mut ctx).await;

        let res = shared.snapshot();
        assert_eq!(res.status, 200);
        assert_eq!(res.body_string(), r#"{"hello":"Alice"}"#);
    }

    #[tokio::test]
    async fn test_dispatch_renders_client_error() {
        let req = MemoryRequest::new(Method::POST, "/signup");
        let (mut ctx, shared) = new_ctx(req);

        dispatch(&CheckedService, &mut ctx).await;

        let res = shared.snapshot();
        assert_eq!(res.status, 400);
        assert!(res.body_string().contains("email"));
    }

    #[tokio::test]
    async fn test_dispatch_converts_misuse_panic_to_500() {
        let req = MemoryRequest::new(Method::GET, "/hello");
        let (mut ctx, shared) = new_ctx(req);

        dispatch(&DoubleWriteService, &mut ctx).await;

        let res = shared.snapshot();
        assert_eq!(res.aborted, Some(500));
        // パニックの内容はクライアントへ渡らない
        assert_eq!(res.body_string(), "first");
    }

    struct DirectWriteService;

    #[async_trait]
    impl Service for DirectWriteService {
        async fn handle(&self, ctx: &mut Context) -> Result<Reply, Error> {
            ctx.response_mut().write(201, "written directly")?;
            Ok(Reply::Value(json!({ "ignored": true })))
        }
    }

    #[tokio::test]
    async fn test_dispatch_skips_reply_when_already_written() {
        let req = MemoryRequest::new(Method::GET, "/hello");
        let (mut ctx, shared) = new_ctx(req);

        dispatch(&DirectWriteService, &mut ctx).await;

        let res = shared.snapshot();
        assert_eq!(res.status, 201);
        assert_eq!(res.body_string(), "written directly");
    }
}
