//! Real-time task updates over websockets. Best-effort only: a dropped
//! socket or missed event never affects task state, clients reconcile by
//! refetching.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A task change pushed to interested clients.
#[derive(Message, Debug, Clone, Serialize)]
#[rtype(result = "()")]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: String,
    /// "created", "assigned" or "status_changed".
    pub kind: String,
    pub status: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<TaskEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<TaskEvent>,
}

/// Fan an event out to the listed users' live sessions.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Publish {
    pub user_ids: Vec<String>,
    pub event: TaskEvent,
}

/// Registry of live websocket sessions, multiple connections per user.
#[derive(Default)]
pub struct TaskFeedServer {
    sessions: HashMap<String, Vec<Recipient<TaskEvent>>>,
}

impl TaskFeedServer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for TaskFeedServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for TaskFeedServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("User {} connected to task feed", msg.user_id);
        self.sessions
            .entry(msg.user_id)
            .or_default()
            .push(msg.addr);
    }
}

impl Handler<Disconnect> for TaskFeedServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("User {} disconnected from task feed", msg.user_id);
        if let Some(addrs) = self.sessions.get_mut(&msg.user_id) {
            addrs.retain(|a| a != &msg.addr);
            if addrs.is_empty() {
                self.sessions.remove(&msg.user_id);
            }
        }
    }
}

impl Handler<Publish> for TaskFeedServer {
    type Result = ();

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) {
        for user_id in &msg.user_ids {
            if let Some(addrs) = self.sessions.get(user_id) {
                for addr in addrs {
                    addr.do_send(msg.event.clone());
                }
            }
        }
    }
}

#[derive(Deserialize)]
pub struct FeedQuery {
    pub user_id: String,
}

/// GET /ws?user_id=... — upgrade to a task-feed session.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<FeedQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let session = TaskFeedSession {
        user_id: query.user_id.clone(),
        hb: Instant::now(),
        server: data.task_feed.clone(),
    };
    ws::start(session, &req, stream)
}

pub struct TaskFeedSession {
    user_id: String,
    hb: Instant,
    server: Addr<TaskFeedServer>,
}

impl TaskFeedSession {
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("Task feed client {} timed out, disconnecting", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for TaskFeedSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        self.server.do_send(Connect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.server.do_send(Disconnect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl Handler<TaskEvent> for TaskFeedSession {
    type Result = ();

    fn handle(&mut self, event: TaskEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(&event) {
            Ok(payload) => ctx.text(payload),
            Err(e) => warn!("Failed to serialize task event: {}", e),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TaskFeedSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            // The feed is push-only; client text frames are ignored.
            Ok(ws::Message::Text(_)) => {}
            Ok(ws::Message::Close(_)) => {
                ctx.stop();
            }
            Err(e) => {
                warn!("Task feed websocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
