use crate::intake::{Alert, Intake, Verdict};
use crate::{Filter, FilterItem, Message};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// How many accepted alerts are kept for replay to new subscribers.
const RECENT_ALERTS: usize = 100;

/// Feeds decoded broadcasts through the [`Intake`] and fans accepted alerts out to subscribers.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    _task: tokio::task::JoinHandle<()>,
    recent: Arc<RwLock<VecDeque<Arc<Entry>>>>,
    broadcast: broadcast::Sender<Arc<Entry>>,
}

#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub last_event_id: Option<String>,
    pub filter: crate::Filter,
    pub content_type: ContentType,
}

/// How a subscriber wants alerts framed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContentType {
    EventStream,
    NdJson,
}

impl ContentType {
    /// `?format=ndjson` or an NDJSON `Accept` header selects NDJSON; everything else gets
    /// server-sent events.
    pub fn negotiate<B>(request: &hyper::Request<B>) -> Self {
        let by_query = request
            .uri()
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .any(|(key, value)| key == "format" && value == "ndjson")
            })
            .unwrap_or(false);
        let by_accept = request
            .headers()
            .get_all(hyper::header::ACCEPT)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .any(|v| v.contains("ndjson"));

        if by_query || by_accept {
            ContentType::NdJson
        } else {
            ContentType::EventStream
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ContentType::EventStream => "text/event-stream; charset=utf-8",
            ContentType::NdJson => "application/x-ndjson; charset=utf-8",
        }
    }
}

impl Dispatcher {
    pub fn new<S, E>(source: S, intake: Arc<Intake>) -> Self
    where
        S: futures::Stream<Item = Result<Message, E>> + Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let (broadcast, _) = broadcast::channel(20);
        let recent = Arc::new(RwLock::new(VecDeque::with_capacity(RECENT_ALERTS)));

        let _task = tokio::task::spawn(run(source, intake, recent.clone(), broadcast.clone()));
        Self {
            _task,
            recent,
            broadcast,
        }
    }

    pub async fn ids(&self) -> Vec<Option<String>> {
        let recent = self.recent.read().await;
        recent.iter().map(|rec| rec.id.clone()).collect()
    }

    pub async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> impl futures::stream::Stream<Item = hyper::http::Result<bytes::Bytes>> {
        let Subscription {
            filter,
            last_event_id,
            content_type,
        } = subscription;

        let rx = self.broadcast.subscribe().into();

        let queue = {
            let recent = self.recent.read().await;
            let queue: Vec<Arc<Entry>> = if let Some(id) = last_event_id {
                // resume after the last alert the client saw
                let mut after = recent.iter().peekable();
                while after.next_if(|r| r.id.as_ref() != Some(&id)).is_some() {}
                if after.next().is_none() {
                    // unknown ID: replay everything we have
                    recent.iter().cloned().collect()
                } else {
                    after.cloned().collect()
                }
            } else {
                // send the last 5
                recent.iter().rev().take(5).rev().cloned().collect()
            };
            queue
                .into_iter()
                .filter(|entry| filter.matches(&**entry))
                .collect::<Vec<_>>()
                .into_iter()
        };

        Receiver {
            rx,
            filter,
            queue,
            content_type,
        }
    }
}

struct Receiver {
    rx: BroadcastStream<Arc<Entry>>,
    filter: Filter,
    queue: std::vec::IntoIter<Arc<Entry>>,
    content_type: ContentType,
}

impl Receiver {
    /// The next alert this subscriber should see: replay first, then live alerts.
    fn poll_entry(&mut self, cx: &mut Context<'_>) -> Poll<Option<Arc<Entry>>> {
        if let Some(entry) = self.queue.next() {
            return Poll::Ready(Some(entry));
        }
        loop {
            match futures::ready!(Pin::new(&mut self.rx).poll_next(cx)) {
                Some(Ok(entry)) if self.filter.matches(&*entry) => {
                    return Poll::Ready(Some(entry))
                }
                Some(Ok(_)) => {}
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    // the subscriber reconnects with Last-Event-ID and gets the gap replayed
                    log::warn!("closing subscriber which missed {} alerts", missed);
                    return Poll::Ready(None);
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl futures::Stream for Receiver {
    type Item = hyper::http::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let content_type = self.content_type;
        self.poll_entry(cx)
            .map(|entry| entry.map(|entry| Ok(entry.frame(content_type))))
    }
}

async fn run<S, E>(
    stream: S,
    intake: Arc<Intake>,
    recent: Arc<RwLock<VecDeque<Arc<Entry>>>>,
    broadcast: broadcast::Sender<Arc<Entry>>,
) where
    S: futures::Stream<Item = Result<Message, E>> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    {
        let intake = intake.clone();
        let now = crate::message::now_millis();
        if let Err(e) = tokio::task::spawn_blocking(move || intake.warm_up(now)).await {
            log::error!("loading recent broadcasts failed: {}", e);
        }
    }

    let mut stream = Box::pin(stream);
    while let Some(event) = stream.next().await {
        let message = match event {
            Ok(message) => message,
            Err(e) => {
                log::error!("source error: {}", e);
                continue;
            }
        };

        // one broadcast at a time, in arrival order
        let intake = intake.clone();
        let alert = match tokio::task::spawn_blocking(move || intake.accept(message)).await {
            Ok(Verdict::Accepted(alert)) => alert,
            Ok(Verdict::Duplicate) => continue,
            Err(e) => {
                log::error!("broadcast intake failed: {}", e);
                continue;
            }
        };

        let entry = Arc::new(Entry::from(alert));

        let mut recent = recent.write().await;
        if recent.len() == RECENT_ALERTS {
            recent.pop_front();
        }
        recent.push_back(entry.clone());
        std::mem::drop(recent);

        // Failures mean "no receiver", not "no one will ever receive", so ignore
        broadcast.send(entry).ok();
    }
    log::warn!("broadcast source ended");
}

/// An accepted alert, pre-rendered for every subscriber.
#[derive(Debug)]
struct Entry {
    item: FilterItem,
    id: Option<String>,
    sse_raw: Bytes,
    json_nd_range: Range<usize>,
}

impl Entry {
    /// The bytes to send for this alert in the given framing.
    fn frame(&self, content_type: ContentType) -> Bytes {
        match content_type {
            ContentType::EventStream => self.sse_raw.clone(),
            ContentType::NdJson => self.sse_raw.slice(self.json_nd_range.clone()),
        }
    }
}

impl<'a> From<&'a Entry> for FilterItem {
    fn from(e: &'a Entry) -> Self {
        e.item
    }
}

impl From<Alert> for Entry {
    fn from(alert: Alert) -> Self {
        let body_len = alert
            .message
            .message_body
            .as_ref()
            .map(String::len)
            .unwrap_or(0);
        let mut sse = Vec::with_capacity(body_len * 9 / 8 + 200);

        sse.extend_from_slice(b"data:");
        let json_start_at = sse.len();
        // serde_json escapes newlines inside strings, so this is a single line
        serde_json::to_writer(&mut sse, &alert).expect("serialize alert");
        let json_end_at = sse.len();

        let id = alert.id.map(|id| id.to_string());
        if let Some(id) = &id {
            sse.extend_from_slice(b"\nid:");
            sse.extend_from_slice(id.as_bytes());
        }
        sse.extend_from_slice(b"\n\n");

        // no matter what, the byte after json_end_at is a newline
        let json_nd_range = json_start_at..json_end_at + 1;

        sse.shrink_to_fit();

        Self {
            item: FilterItem {
                service_category: alert.message.service_category,
                subscription: alert.message.subscription,
                emergency: alert.emergency,
            },
            id,
            sse_raw: Bytes::from(sse),
            json_nd_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::Location;

    fn message(service_category: i32, serial_number: i32, subscription: u32) -> Message {
        Message {
            service_category,
            serial_number,
            location: Location::new(Some("310260"), 1, 2),
            message_body: Some("line one\nline two".into()),
            delivery_time: crate::message::now_millis(),
            subscription,
            network: crate::Network::Gsm,
        }
    }

    #[test]
    fn entry_framing() {
        let entry = Entry::from(Alert {
            id: Some(12),
            emergency: true,
            message: message(4370, 1, 0),
        });
        let sse = std::str::from_utf8(&entry.sse_raw).unwrap();
        assert!(sse.starts_with("data:{"));
        assert!(sse.ends_with("}\nid:12\n\n"));
        assert_eq!(sse.matches('\n').count(), 3);

        let nd = entry.frame(ContentType::NdJson);
        assert!(nd.ends_with(b"}\n"));
        let alert: Alert = serde_json::from_slice(&nd).unwrap();
        assert_eq!(alert.id, Some(12));
        assert_eq!(alert.message.message_body.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn content_negotiation() {
        let negotiate = |uri: &str, accept: Option<&str>| {
            let mut request = hyper::Request::builder().uri(uri);
            if let Some(accept) = accept {
                request = request.header(hyper::header::ACCEPT, accept);
            }
            ContentType::negotiate(&request.body(()).unwrap())
        };
        assert_eq!(negotiate("/stream", None), ContentType::EventStream);
        assert_eq!(
            negotiate("/stream", Some("text/event-stream")),
            ContentType::EventStream
        );
        assert_eq!(
            negotiate("/stream", Some("application/x-ndjson")),
            ContentType::NdJson
        );
        assert_eq!(
            negotiate("/stream?category=4370&format=ndjson", None),
            ContentType::NdJson
        );
        assert_eq!(ContentType::NdJson.mime(), "application/x-ndjson; charset=utf-8");
    }

    async fn collect(
        dispatcher: &Dispatcher,
        subscription: Subscription,
        n: usize,
    ) -> Vec<Alert> {
        dispatcher
            .subscribe(subscription)
            .await
            .take(n)
            .map(|bytes| serde_json::from_slice::<Alert>(&bytes.unwrap()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn duplicates_are_dropped_and_replay_is_filtered() {
        let source = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(message(4370, 1, 0)),
            Ok(message(4370, 1, 0)),
            Ok(message(4371, 2, 1)),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "garbled")),
            Ok(message(4352, 3, 0)),
        ]);
        let intake = Arc::new(Intake::new(Arc::new(MemoryStore::new())));
        let dispatcher = Dispatcher::new(source, intake.clone());

        for _ in 0..100 {
            if dispatcher.ids().await.len() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            dispatcher.ids().await,
            vec![Some("1".into()), Some("2".into()), Some("3".into())]
        );
        assert_eq!(intake.store().live_rows().unwrap().len(), 3);

        let all = collect(
            &dispatcher,
            Subscription {
                last_event_id: None,
                filter: Filter::new(),
                content_type: ContentType::NdJson,
            },
            3,
        )
        .await;
        assert_eq!(
            all.iter().map(|a| a.message.serial_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let sub0 = collect(
            &dispatcher,
            Subscription {
                last_event_id: None,
                filter: Filter::new().with_subscription([0]),
                content_type: ContentType::NdJson,
            },
            2,
        )
        .await;
        assert_eq!(
            sub0.iter().map(|a| a.message.serial_number).collect::<Vec<_>>(),
            vec![1, 3]
        );

        let resumed = collect(
            &dispatcher,
            Subscription {
                last_event_id: Some("1".into()),
                filter: Filter::new(),
                content_type: ContentType::NdJson,
            },
            2,
        )
        .await;
        assert_eq!(
            resumed.iter().map(|a| a.message.serial_number).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }
}
