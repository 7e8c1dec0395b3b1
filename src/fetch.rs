use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, header::LOCATION, redirect::Policy};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// The catalog serves Latin-1 style pages without always announcing a charset.
const DEFAULT_CHARSET: &str = "windows-1252";

pub type FormPayload = [(&'static str, String)];

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: u16,
    pub body: String,
    pub redirect: Option<Url>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Raw torrent bytes, before any redirect is followed.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    pub url: Url,
    pub status: u16,
    pub bytes: Vec<u8>,
    pub redirect: Option<Url>,
}

/// Transport boundary. Implementations must not follow redirects on their own:
/// the indexer decides where a redirect goes.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        url: &Url,
        form: Option<&FormPayload>,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;

    fn download(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<DownloadResponse, FetchError>> + Send;
}

/// Fetches `url` and follows at most one redirect hop with a plain GET.
pub async fn fetch_following<F: Fetcher>(
    fetcher: &F,
    url: &Url,
    form: Option<&FormPayload>,
) -> Result<FetchResponse, FetchError> {
    let response = fetcher.fetch(url, form).await?;
    let response = match response.redirect.clone() {
        Some(target) => {
            debug!(from = %url, to = %target, "following redirect");
            fetcher.fetch(&target, None).await?
        }
        None => response,
    };

    if !response.is_success() {
        return Err(FetchError::Status {
            status: response.status,
            url: response.url,
        });
    }

    Ok(response)
}

/// Downloads a torrent, following at most one redirect hop. Anything but a
/// non-empty 2xx body is an error so the caller can try the next mirror.
pub async fn download_following<F: Fetcher>(fetcher: &F, url: &Url) -> Result<Vec<u8>, FetchError> {
    let response = fetcher.download(url).await?;
    let response = match response.redirect.clone() {
        Some(target) => {
            debug!(from = %url, to = %target, "following torrent redirect");
            fetcher.download(&target).await?
        }
        None => response,
    };

    if !(200..300).contains(&response.status) {
        return Err(FetchError::Status {
            status: response.status,
            url: response.url,
        });
    }
    if response.bytes.is_empty() {
        return Err(FetchError::EmptyPayload { url: response.url });
    }

    Ok(response.bytes)
}

fn redirect_target(url: &Url, response: &Response) -> Option<Url> {
    if !response.status().is_redirection() {
        return None;
    }
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| url.join(location).ok())
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(format!("newpctr/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        form: Option<&FormPayload>,
    ) -> Result<FetchResponse, FetchError> {
        let request = match form {
            Some(form) => self.http.post(url.clone()).form(form),
            None => self.http.get(url.clone()),
        };

        let response = request.send().await?;
        let status = response.status();
        let redirect = redirect_target(url, &response);

        let body = response.text_with_charset(DEFAULT_CHARSET).await?;

        debug!(
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            redirect = redirect.as_ref().map(Url::as_str),
            "catalog response received"
        );

        Ok(FetchResponse {
            url: url.clone(),
            status: status.as_u16(),
            body,
            redirect,
        })
    }

    async fn download(&self, url: &Url) -> Result<DownloadResponse, FetchError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        let redirect = redirect_target(url, &response);
        let bytes = response.bytes().await?.to_vec();

        debug!(
            url = %url,
            status = status.as_u16(),
            bytes = bytes.len(),
            redirect = redirect.as_ref().map(Url::as_str),
            "torrent response received"
        );

        Ok(DownloadResponse {
            url: url.clone(),
            status: status.as_u16(),
            bytes,
            redirect,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error when querying catalog mirror")]
    Http(#[from] reqwest::Error),
    #[error("catalog mirror {url} answered with status {status}")]
    Status { status: u16, url: Url },
    #[error("catalog mirror {url} returned an empty torrent")]
    EmptyPayload { url: Url },
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;

    /// Answers one connection per canned response, in order.
    fn serve(responses: Vec<String>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for response in responses {
                let (mut socket, _) = listener.accept().unwrap();
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request);
                socket.write_all(response.as_bytes()).unwrap();
            }
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn http_response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_download_follows_one_redirect() {
        let base = serve(vec![
            http_response("302 Found", "Location: /real.torrent\r\n", ""),
            http_response("200 OK", "", "d8:announce"),
        ]);
        let link = base.join("descargar-torrent/1").unwrap();

        let bytes = download_following(&fetcher(), &link).await.unwrap();

        assert_eq!(bytes, b"d8:announce");
    }

    #[tokio::test]
    async fn test_download_rejects_empty_and_error_responses() {
        let base = serve(vec![
            http_response("200 OK", "", ""),
            http_response("404 Not Found", "", "gone"),
        ]);
        let link = base.join("descargar-torrent/1").unwrap();

        let empty = download_following(&fetcher(), &link).await;
        assert!(matches!(empty, Err(FetchError::EmptyPayload { .. })));

        let missing = download_following(&fetcher(), &link).await;
        assert!(matches!(missing, Err(FetchError::Status { status: 404, .. })));
    }
}
