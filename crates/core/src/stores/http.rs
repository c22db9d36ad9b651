use crate::error::SourceError;
use crate::models::FigureId;
use crate::traits::{CancelSignal, FigureSource};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Figure retrieval from the analysis provider's REST API:
/// `GET {endpoint}/documents/{document_id}/figures/{figure_id}`.
pub struct HttpFigureSource {
    client: Arc<Client>,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpFigureSource {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, SourceError> {
        let endpoint = Url::parse(endpoint)?;
        Ok(Self {
            client: Arc::new(Client::new()),
            endpoint,
            api_key,
        })
    }

    pub fn figure_url(&self, document_id: &str, figure_id: &FigureId) -> Result<Url, SourceError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable(format!("{} cannot be a base url", self.endpoint)))?
            .pop_if_empty()
            .extend(["documents", document_id, "figures", figure_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl FigureSource for HttpFigureSource {
    async fn figure_bytes(
        &self,
        document_id: &str,
        figure_id: &FigureId,
        cancel: &CancelSignal,
    ) -> Result<Vec<u8>, SourceError> {
        let url = self.figure_url(document_id, figure_id)?;
        let mut request = self.client.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        let mut response = request.send().await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound(url.to_string())),
            StatusCode::GONE => return Err(SourceError::DocumentMissing(document_id.to_string())),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                return Err(SourceError::Timeout(url.to_string()))
            }
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                return Err(SourceError::Unavailable(format!("{url} answered {status}")))
            }
            status => return Err(SourceError::NotFound(format!("{url} answered {status}"))),
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            bytes.extend_from_slice(&chunk);
        }
        debug!(document_id, figure = %figure_id, size = bytes.len(), "figure downloaded");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn figure_url_escapes_segments() {
        let source = HttpFigureSource::new("https://analysis.example.com/v1", None).expect("valid url");
        let url = source
            .figure_url("exam 2024", &FigureId::new("1.2"))
            .expect("url builds");
        assert_eq!(
            url.as_str(),
            "https://analysis.example.com/v1/documents/exam%202024/figures/1.2"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let source = HttpFigureSource::new("https://analysis.example.com/", None).expect("valid url");
        let url = source.figure_url("doc", &FigureId::new("3")).expect("url builds");
        assert_eq!(url.as_str(), "https://analysis.example.com/documents/doc/figures/3");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(matches!(
            HttpFigureSource::new("not a url", None),
            Err(SourceError::Url(_))
        ));
    }
}
