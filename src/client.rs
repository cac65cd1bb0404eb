use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use hyper::Body;
use std::error::Error;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// How long to wait before reconnecting after the upstream feed ends or fails.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Receives decoded broadcasts from an upstream server-sent event feed.
///
/// The feed can be a modem bridge which publishes decoded SMS-CB messages, or the `/stream` of
/// another receiver. Each event's data is one JSON [`Message`](crate::Message). The client
/// reconnects forever.
pub struct Client {
    inner: BoxStream<'static, Result<crate::Message, ClientError>>,
}

impl Client {
    pub fn new<C>(client: hyper::client::Client<C, Body>, uri: hyper::Uri) -> Self
    where
        C: hyper::client::connect::Connect + Clone + Send + Sync + 'static,
    {
        Self {
            inner: futures::stream::repeat(())
                .enumerate()
                .then(|(attempt, ())| async move {
                    if attempt > 0 {
                        log::info!("reconnecting in {:?}", RECONNECT_DELAY);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                })
                .flat_map(move |()| connection(client.clone(), uri.clone()))
                .boxed(),
        }
    }

    pub fn for_uri(uri: hyper::Uri) -> Self {
        Self::new(
            hyper::client::Client::builder().build(hyper_tls::HttpsConnector::new()),
            uri,
        )
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ClientError {
    HttpRequest(hyper::Error),
    HttpStatus(hyper::StatusCode),
    EventStream(Box<dyn std::error::Error + Send + Sync + 'static>),
    MessageFormat(Option<String>, serde_json::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            ClientError::HttpRequest(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::HttpStatus(status) => write!(f, "upstream responded {}", status),
            ClientError::EventStream(e) => write!(f, "event stream error: {}", e),
            ClientError::MessageFormat(id, err) => {
                write!(f, "invalid message format in ID={:?}: {}", id, err)
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientError::HttpRequest(e) => Some(e),
            ClientError::HttpStatus(_) => None,
            ClientError::EventStream(e) => Some(e.as_ref()),
            ClientError::MessageFormat(_, e) => Some(e),
        }
    }
}

impl futures::Stream for Client {
    type Item = Result<crate::Message, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// One connection to the upstream feed, ending when the response body does.
fn connection<C>(
    client: hyper::client::Client<C, Body>,
    uri: hyper::Uri,
) -> BoxStream<'static, Result<crate::Message, ClientError>>
where
    C: hyper::client::connect::Connect + Clone + Send + Sync + 'static,
{
    futures::stream::once(connect(client, uri))
        .try_flatten()
        .boxed()
}

async fn connect<C>(
    client: hyper::client::Client<C, Body>,
    uri: hyper::Uri,
) -> Result<impl Stream<Item = Result<crate::Message, ClientError>>, ClientError>
where
    C: hyper::client::connect::Connect + Clone + Send + Sync + 'static,
{
    let request = hyper::Request::builder()
        .uri(uri.clone())
        .header(hyper::header::ACCEPT, "text/event-stream")
        .header(
            hyper::header::USER_AGENT,
            concat!("cellbroadcast-receiver/", env!("CARGO_PKG_VERSION")),
        )
        .body(Body::empty())
        .expect("build request");

    let response = client
        .request(request)
        .await
        .map_err(ClientError::HttpRequest)?;
    if !response.status().is_success() {
        return Err(ClientError::HttpStatus(response.status()));
    }
    log::info!("connected to {}: {}", uri, response.status());

    let body = TryStreamExt::map_err(response.into_body(), |e| {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    })
    .into_async_read();

    Ok(async_sse::decode(body).filter_map(|event| futures::future::ready(decode_event(event))))
}

/// Turn one server-sent event into a broadcast. Retry hints carry nothing for us.
fn decode_event<E>(
    event: Result<async_sse::Event, E>,
) -> Option<Result<crate::Message, ClientError>>
where
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
{
    let message = match event {
        Ok(async_sse::Event::Message(message)) => message,
        Ok(async_sse::Event::Retry(_)) => return None,
        Err(e) => return Some(Err(ClientError::EventStream(e.into()))),
    };
    Some(
        serde_json::from_slice(message.data())
            .map_err(|e| ClientError::MessageFormat(message.id().clone(), e)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(feed: &'static str) -> Vec<Result<crate::Message, ClientError>> {
        futures::executor::block_on(
            async_sse::decode(futures::io::Cursor::new(feed.as_bytes()))
                .filter_map(|event| futures::future::ready(decode_event(event)))
                .collect(),
        )
    }

    #[test]
    fn events_decode_to_messages() {
        let decoded = decode_all(concat!(
            "retry:1000\n\n",
            "id:7\n",
            "data:{\"serviceCategory\":4370,\"serialNumber\":12,\"deliveryTime\":5}\n\n",
            "id:8\n",
            "data:{\n\n",
        ));
        assert_eq!(decoded.len(), 2);

        let message = decoded[0].as_ref().unwrap();
        assert_eq!(message.service_category, 4370);
        assert_eq!(message.serial_number, 12);
        assert_eq!(message.delivery_time, 5);

        assert!(matches!(
            &decoded[1],
            Err(ClientError::MessageFormat(Some(id), _)) if id == "8"
        ));
    }
}
