use crate::channel_config::ChannelReport;
use crate::intake::Intake;
use crate::store::RowId;
use hyper::http::{header, Request};
use hyper::{Body, Method, Response, StatusCode};
use std::sync::Arc;

mod dispatch;
use dispatch::{ContentType, Dispatcher, Subscription};

/// The HTTP face of the receiver: alert streaming and stored broadcast management.
#[derive(Debug)]
pub struct Server {
    dispatcher: Dispatcher,
    intake: Arc<Intake>,
    channels: Vec<ChannelReport>,
}

impl Server {
    /// Start feeding `source` through `intake`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S, E>(source: S, intake: Arc<Intake>) -> Self
    where
        S: futures::Stream<Item = Result<crate::Message, E>> + Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        Self {
            dispatcher: Dispatcher::new(source, intake.clone()),
            intake,
            channels: Vec::new(),
        }
    }

    /// Report these enabled channels from `/channels`.
    pub fn with_channels(self, channels: Vec<ChannelReport>) -> Self {
        Self { channels, ..self }
    }

    /// `GET /stream`: accepted alerts as server-sent events or NDJSON.
    pub async fn stream(&self, request: Request<Body>) -> hyper::http::Result<Response<Body>> {
        if request.method() != Method::GET {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }

        match request
            .headers()
            .get(header::ACCEPT)
            .and_then(|h| std::str::from_utf8(h.as_bytes()).ok())
        {
            Some(value) if value.contains("text/event-stream") => {
                self.handle_sse_request(request).await
            }
            Some(value) if value.contains("application/json") || value.contains("text/json") => {
                self.handle_json_request(request).await
            }
            _ => self.handle_sse_request(request).await,
        }
    }

    /// `GET /broadcasts` lists stored broadcasts, `DELETE /broadcasts` deletes all of them.
    pub async fn broadcasts(&self, request: Request<Body>) -> hyper::http::Result<Response<Body>> {
        match *request.method() {
            Method::GET => {
                let store = self.intake.store().clone();
                match tokio::task::spawn_blocking(move || store.live_rows()).await {
                    Ok(Ok(rows)) => json_response(&rows),
                    Ok(Err(e)) => {
                        log::error!("failed to list broadcasts: {}", e);
                        error_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable\n")
                    }
                    Err(e) => {
                        log::error!("failed to list broadcasts: {}", e);
                        error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n")
                    }
                }
            }
            Method::DELETE => {
                let store = self.intake.store().clone();
                self.deletion(move |now| crate::retention::mark_all_items_deleted(&store, now))
                    .await
            }
            _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n"),
        }
    }

    /// `DELETE /broadcasts/{id}` deletes one stored broadcast.
    pub async fn broadcast(
        &self,
        request: Request<Body>,
        id: &str,
    ) -> hyper::http::Result<Response<Body>> {
        if request.method() != Method::DELETE {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }
        let id: RowId = match id.parse() {
            Ok(id) => id,
            Err(_) => return error_response(StatusCode::NOT_FOUND, "not found\n"),
        };

        let store = self.intake.store().clone();
        self.deletion(move |now| crate::retention::mark_item_deleted(&store, id, now))
            .await
    }

    /// `GET /channels`: the channels enabled on the radio at startup.
    pub async fn channels(&self, request: Request<Body>) -> hyper::http::Result<Response<Body>> {
        if request.method() != Method::GET {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }
        json_response(&self.channels)
    }

    async fn deletion<F>(&self, delete: F) -> hyper::http::Result<Response<Body>>
    where
        F: FnOnce(i64) -> bool + Send + 'static,
    {
        let now = crate::message::now_millis();
        match tokio::task::spawn_blocking(move || delete(now)).await {
            Ok(true) => Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Body::empty()),
            Ok(false) => error_response(StatusCode::NOT_FOUND, "nothing to delete\n"),
            Err(e) => {
                log::error!("deletion failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n")
            }
        }
    }

    async fn handle_json_request(
        &self,
        _request: Request<Body>,
    ) -> hyper::http::Result<Response<Body>> {
        #[derive(serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Json {
            ids: Vec<Option<String>>,
            window: usize,
        }

        let response = Json {
            ids: self.dispatcher.ids().await,
            window: self.intake.filter().len(),
        };
        json_response(&response)
    }

    async fn handle_sse_request(
        &self,
        request: Request<Body>,
    ) -> hyper::http::Result<Response<Body>> {
        let filter = crate::Filter::from(request.uri());

        let last_event_id = request
            .headers()
            .get(header::HeaderName::from_static("last-event-id"))
            .map(|id| String::from_utf8_lossy(id.as_bytes()).into_owned());

        let content_type = ContentType::negotiate(&request);

        let body = self
            .dispatcher
            .subscribe(Subscription {
                last_event_id,
                filter,
                content_type,
            })
            .await;

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type.mime())
            .header(header::CACHE_CONTROL, "private, no-cache")
            .body(Body::wrap_stream(body))
    }
}

fn json_response<T: serde::Serialize>(value: &T) -> hyper::http::Result<Response<Body>> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            log::error!("failed to serialize response: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n");
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .header(header::CACHE_CONTROL, "must-revalidate")
        .body(Body::from(body))
}

fn error_response(
    status_code: StatusCode,
    message: &'static str,
) -> hyper::http::Result<Response<Body>> {
    Response::builder()
        .status(status_code)
        .body(Body::from(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::{Location, Message};

    fn message(serial_number: i32) -> Message {
        Message {
            service_category: 4370,
            serial_number,
            location: Location::new(Some("310260"), 1, 2),
            message_body: Some("Presidential alert".into()),
            delivery_time: crate::message::now_millis(),
            subscription: 0,
            network: crate::Network::Gsm,
        }
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body(response: Response<Body>) -> Vec<u8> {
        hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = Arc::new(MemoryStore::new());
        let first = store.insert(&message(1)).unwrap();
        store.insert(&message(2)).unwrap();

        let intake = Arc::new(Intake::new(store.clone()));
        let server = Server::new(
            futures::stream::empty::<Result<Message, std::io::Error>>(),
            intake,
        );

        let response = server
            .broadcasts(request(Method::GET, "/broadcasts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rows: Vec<crate::store::Row> = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(rows.len(), 2);

        let response = server
            .broadcast(request(Method::DELETE, "/broadcasts/1"), &first.to_string())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.live_rows().unwrap().len(), 1);

        let response = server
            .broadcast(request(Method::DELETE, "/broadcasts/99"), "99")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server
            .broadcast(request(Method::GET, "/broadcasts/1"), "1")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = server
            .broadcasts(request(Method::DELETE, "/broadcasts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.live_rows().unwrap().is_empty());

        let response = server
            .broadcasts(request(Method::DELETE, "/broadcasts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn channels_report() {
        let server = Server::new(
            futures::stream::empty::<Result<Message, std::io::Error>>(),
            Arc::new(Intake::new(Arc::new(MemoryStore::new()))),
        )
        .with_channels(vec![ChannelReport {
            network: crate::Network::Gsm,
            subscription: 0,
            channels: "4370".into(),
        }]);

        let response = server
            .channels(request(Method::GET, "/channels"))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"network": "gsm", "subscription": 0, "channels": "4370"}])
        );
    }
}
