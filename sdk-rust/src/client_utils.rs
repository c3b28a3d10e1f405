use crate::{boxed_stream::BoxedStream, ProviderError};
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use reqwest::{header::HeaderMap, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};

/// Send a request and parse the JSON response.
/// Throws error on non-success status code.
async fn send<R: DeserializeOwned>(request: RequestBuilder) -> Result<R, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::StatusCode(
            status,
            response.text().await.unwrap_or_default(),
        ));
    }
    Ok(response.json::<R>().await?)
}

/// Create a JSON request, parse the response.
pub async fn send_json<T: Serialize, R: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    data: &T,
    headers: HeaderMap,
) -> Result<R, ProviderError> {
    send(client.post(url).headers(headers).json(data)).await
}

/// Issue a GET request with query parameters, parse the response.
pub async fn get_json<Q: Serialize + ?Sized, R: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &Q,
    headers: HeaderMap,
) -> Result<R, ProviderError> {
    send(client.get(url).headers(headers).query(query)).await
}

/// A server-sent event with its name and raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEvent {
    pub event: String,
    pub data: String,
}

/// Create a JSON request that returns an SSE stream of named events.
/// Empty data lines are skipped. The stream ends on a "[DONE]" payload or
/// when the connection closes.
pub async fn send_sse_events<T: Serialize>(
    client: &reqwest::Client,
    url: &str,
    data: &T,
    headers: HeaderMap,
    provider: &'static str,
) -> Result<BoxedStream<'static, Result<NamedEvent, ProviderError>>, ProviderError> {
    let response = client.post(url).headers(headers).json(data).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::StatusCode(
            status,
            response.text().await.unwrap_or_default(),
        ));
    }

    let mut sse_stream = response.bytes_stream().eventsource();

    let stream = async_stream::try_stream! {
        while let Some(event) = sse_stream.next().await {
            match event {
                Ok(event) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    if event.data == "[DONE]" {
                        break;
                    }
                    yield NamedEvent {
                        event: event.event,
                        data: event.data,
                    };
                }
                Err(e) => {
                    match e {
                        eventsource_stream::EventStreamError::Utf8(_) => {
                            Err(ProviderError::Invariant(
                                provider,
                                "Receive invalid UTF-8 sequence for stream data".to_string()
                            ))?;
                        }
                        eventsource_stream::EventStreamError::Parser(error) => {
                            Err(ProviderError::Invariant(
                                provider,
                                format!("Receive invalid EventStream data: {error}")
                            ))?;
                        },
                        eventsource_stream::EventStreamError::Transport(e) => {
                            Err(ProviderError::Transport(e))?;
                        }
                    }
                }
            }
        }
    };

    Ok(BoxedStream::from_stream(stream))
}
