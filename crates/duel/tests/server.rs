//! Integration tests for the Duel server and client over real sockets.

use std::sync::Arc;
use std::time::Duration;

use duel::prelude::*;
use duel::SessionSet;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

// =========================================================================
// Controllers
// =========================================================================

#[derive(Serialize, Deserialize)]
struct Greeting {
    name: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Welcome {
    text: String,
}

struct Greet;

impl Method for Greet {
    const ADDRESS: &'static str = "hello";
    const VERB: &'static str = "greet";
    type Body = Greeting;
    type Reply = Welcome;
}

/// Server side: greets using the prefix registered as a service.
struct HelloController {
    prefix: Result<Arc<String>, HandlerError>,
}

impl Controller for HelloController {
    fn process<'a>(
        &'a self,
        request: &'a Envelope,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            let prefix = match &self.prefix {
                Ok(prefix) => prefix,
                Err(_) => return Err(HandlerError::internal("no prefix service")),
            };
            match request.verb.as_str() {
                "greet" => {
                    let greeting: Greeting = request.body()?;
                    Ok(Response::ok_with(&Welcome {
                        text: format!("{prefix}, {}", greeting.name),
                    })?)
                }
                _ => Ok(Response::method_not_allowed()),
            }
        })
    }
}

/// Server side: asks the client what its name is before answering.
struct WhoAmIController {
    requests: RequestManager,
}

impl Controller for WhoAmIController {
    fn process<'a>(
        &'a self,
        _request: &'a Envelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            let name = self
                .requests
                .send_request("profile", "name", "", Some(cancel))
                .await?;
            Ok(Response::Ok(Some(format!("you are {name}"))))
        })
    }
}

/// Client side: answers the server's profile question.
struct ProfileController;

impl Controller for ProfileController {
    fn process<'a>(
        &'a self,
        _request: &'a Envelope,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async { Ok(Response::Ok(Some("bob".into()))) })
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn builder() -> DuelServerBuilder {
    DuelServer::builder()
        .bind("127.0.0.1:0")
        .service(Arc::new(String::from("Welcome")))
        .route("hello", |ctx: &ConnectionContext| HelloController {
            prefix: ctx.service::<String>(),
        })
        .unwrap()
        .route("whoami", |ctx: &ConnectionContext| WhoAmIController {
            requests: ctx.requests().clone(),
        })
        .unwrap()
}

fn client() -> duel::DuelClientBuilder {
    DuelClient::builder()
        .route("profile", |_| ProfileController)
        .unwrap()
}

struct Running {
    addr: String,
    sessions: SessionSet,
    stop: oneshot::Sender<()>,
    done: tokio::task::JoinHandle<Result<(), DuelError>>,
}

async fn start_tcp() -> Running {
    let server = builder().build_tcp().await.expect("server should build");
    spawn(server)
}

async fn start_websocket() -> Running {
    let server = builder()
        .build_websocket()
        .await
        .expect("server should build");
    spawn(server)
}

fn spawn<T: duel::transport::Transport>(server: DuelServer<T>) -> Running {
    let addr = server.local_addr().expect("local addr").to_string();
    let sessions = server.sessions();
    let (stop, stopped) = oneshot::channel::<()>();
    let done = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        sessions,
        stop,
        done,
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_tcp_typed_call() {
    let server = start_tcp().await;
    let session = client().connect_tcp(&server.addr).await.unwrap();

    let reply = session
        .call::<Greet>(&Greeting { name: "alice".into() }, None)
        .await
        .unwrap();
    assert_eq!(reply.text, "Welcome, alice");
}

#[tokio::test]
async fn test_websocket_typed_call() {
    let server = start_websocket().await;
    let session = client()
        .connect_websocket(&format!("ws://{}", server.addr))
        .await
        .unwrap();

    let reply = session
        .call::<Greet>(&Greeting { name: "alice".into() }, None)
        .await
        .unwrap();
    assert_eq!(reply.text, "Welcome, alice");
}

#[tokio::test]
async fn test_server_calls_back_into_client() {
    let server = start_tcp().await;
    let session = client().connect_tcp(&server.addr).await.unwrap();

    let reply = session
        .send_request("whoami", "ask", "", None)
        .await
        .unwrap();
    assert_eq!(reply, "you are bob");
}

#[tokio::test]
async fn test_unknown_route_over_the_wire() {
    let server = start_websocket().await;
    let session = client()
        .connect_websocket(&format!("ws://{}", server.addr))
        .await
        .unwrap();

    let err = session
        .send_request("/nope", "get", "", None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
}

#[tokio::test]
async fn test_sessions_are_tracked_and_removed() {
    let server = start_tcp().await;
    let first = client().connect_tcp(&server.addr).await.unwrap();
    let second = client().connect_tcp(&server.addr).await.unwrap();

    eventually("two sessions", || server.sessions.len() == 2).await;

    first.dispose().await;
    eventually("one session", || server.sessions.len() == 1).await;

    second.dispose().await;
    eventually("no sessions", || server.sessions.is_empty()).await;
}

#[tokio::test]
async fn test_shutdown_closes_client_sessions() {
    let server = start_tcp().await;
    let session = client().connect_tcp(&server.addr).await.unwrap();
    eventually("session accepted", || server.sessions.len() == 1).await;

    server.stop.send(()).unwrap();
    server.done.await.unwrap().unwrap();

    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("client should see the server go away");
    let err = session
        .send_request("hello", "greet", "{}", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Disconnected));
}

#[test]
fn test_reserved_route_rejected_by_builder() {
    let result = DuelServer::builder().route("@cancel", |_| ProfileController);
    assert!(matches!(result, Err(DuelError::Session(_))));
}
