use crate::client::Client;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::Poll;
use tokio::io::AsyncBufReadExt;

/// Where decoded broadcasts come from.
pub enum Source {
    /// An upstream server-sent event feed
    Http(Client),
    /// Newline-delimited JSON messages on standard input, one per broadcast
    Stdin(futures::stream::BoxStream<'static, Result<crate::Message, SourceError>>),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Source::Http(client) => f.debug_tuple("Http").field(client).finish(),
            Source::Stdin(_) => f.write_str("Stdin(..)"),
        }
    }
}

impl Source {
    pub fn new(uri: Option<hyper::Uri>) -> Self {
        match uri {
            Some(uri) => {
                log::info!("receiving broadcasts from {}", uri);
                Source::Http(Client::for_uri(uri))
            }
            None => {
                log::info!("receiving broadcasts from standard input");
                Source::Stdin(stdin_messages())
            }
        }
    }
}

fn stdin_messages() -> futures::stream::BoxStream<'static, Result<crate::Message, SourceError>> {
    let lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    tokio_stream::wrappers::LinesStream::new(lines)
        .filter_map(|line| {
            futures::future::ready(match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(
                    serde_json::from_str(&line).map_err(|e| SourceError(Box::new(e))),
                ),
                Err(e) => Some(Err(SourceError(Box::new(e)))),
            })
        })
        .boxed()
}

impl futures::Stream for Source {
    type Item = Result<crate::Message, SourceError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            Source::Http(s) => match Pin::new(s).poll_next(cx) {
                Poll::Ready(Some(Ok(m))) => Poll::Ready(Some(Ok(m))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(SourceError(Box::new(e))))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            Source::Stdin(s) => s.as_mut().poll_next(cx),
        }
    }
}

#[derive(Debug)]
pub struct SourceError(Box<dyn std::error::Error + Send>);

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SourceError {}
