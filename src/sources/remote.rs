use bytes::Bytes;
use reqwest::{Client, Url};
use tracing::{error, info};

use super::{Acquisition, OriginKind, SourceDescriptor};
use crate::config::RemoteSourceConfig;
use crate::types::{AppError, AppResult, Notice};

async fn fetch_bytes(client: &Client, url: &str) -> AppResult<Bytes> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Acquisition(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Acquisition(format!("{}: HTTP {}", url, status)));
    }

    response
        .bytes()
        .await
        .map_err(|e| AppError::Acquisition(format!("{}: {}", url, e)))
}

/// Last non-empty path segment of a URL
fn file_name_from_url(raw: &str) -> AppResult<String> {
    let url = Url::parse(raw).map_err(|e| AppError::Acquisition(format!("{}: {}", raw, e)))?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| AppError::Acquisition(format!("{}: URL has no file name", raw)))
}

/// Fetch each non-blank line of `input` as a URL.
pub async fn fetch_url_list(client: &Client, input: &str) -> Acquisition {
    let mut acquisition = Acquisition::default();

    for url in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fetched = match file_name_from_url(url) {
            Ok(name) => fetch_bytes(client, url).await.map(|content| (name, content)),
            Err(e) => Err(e),
        };

        match fetched {
            Ok((name, content)) => {
                info!(url = %url, bytes = content.len(), "Fetched remote file");
                acquisition
                    .descriptors
                    .push(SourceDescriptor::new(OriginKind::UrlList, name, content));
            }
            Err(e) => {
                error!(url = %url, error = %e, "Failed to fetch URL");
                acquisition.notices.push(Notice::from(&e));
            }
        }
    }

    if acquisition.descriptors.is_empty() && acquisition.notices.is_empty() {
        acquisition.notices.push(Notice::warning("No URLs were provided."));
    }

    acquisition
}

/// Fetch the configured file list from the configured repository.
pub async fn fetch_fixed_remote(client: &Client, remote: &RemoteSourceConfig) -> Acquisition {
    let mut acquisition = Acquisition::default();
    let base = remote.base_url.trim_end_matches('/');

    for file_name in &remote.files {
        let url = format!("{}/{}", base, file_name);
        match fetch_bytes(client, &url).await {
            Ok(content) => {
                info!(file = %file_name, bytes = content.len(), "Downloaded default file");
                acquisition.descriptors.push(SourceDescriptor::new(
                    OriginKind::FixedRemote,
                    file_name.clone(),
                    content,
                ));
            }
            Err(e) => {
                error!(file = %file_name, error = %e, "Error downloading default file");
                acquisition
                    .notices
                    .push(Notice::error(format!("Error downloading {}: {}", file_name, e)));
            }
        }
    }

    acquisition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoticeLevel;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.org/data/AE.csv").unwrap(),
            "AE.csv"
        );
        assert_eq!(
            file_name_from_url("https://example.org/data/lb.xpt/").unwrap(),
            "lb.xpt"
        );
        assert!(file_name_from_url("https://example.org/").is_err());
        assert!(file_name_from_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_url_list_tolerates_partial_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/AE.csv")
            .with_status(200)
            .with_body("USUBJID,AETERM\n01,HEADACHE\n")
            .create_async()
            .await;
        server
            .mock("GET", "/missing.csv")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/DM.csv")
            .with_status(200)
            .with_body("USUBJID,AGE\n01,40\n")
            .create_async()
            .await;

        let input = format!(
            "{base}/AE.csv\n\n  {base}/missing.csv  \n{base}/DM.csv\n",
            base = server.url()
        );
        let acquisition = fetch_url_list(&Client::new(), &input).await;

        let names: Vec<_> = acquisition
            .descriptors
            .iter()
            .map(|d| d.file_name.as_str())
            .collect();
        assert_eq!(names, vec!["AE.csv", "DM.csv"]);
        assert_eq!(acquisition.notices.len(), 1);
        assert_eq!(acquisition.notices[0].level, NoticeLevel::Error);
        assert!(acquisition.notices[0].message.contains("404"));
    }

    #[tokio::test]
    async fn test_fixed_remote_uses_configured_location() {
        let mut server = mockito::Server::new_async().await;
        let ae = server
            .mock("GET", "/repo/main/AE.csv")
            .with_status(200)
            .with_body("a,b\n1,2\n")
            .create_async()
            .await;
        server
            .mock("GET", "/repo/main/LB.csv")
            .with_status(500)
            .create_async()
            .await;

        let remote = RemoteSourceConfig {
            base_url: format!("{}/repo/main/", server.url()),
            files: vec!["AE.csv".to_string(), "LB.csv".to_string()],
        };
        let acquisition = fetch_fixed_remote(&Client::new(), &remote).await;

        ae.assert_async().await;
        assert_eq!(acquisition.descriptors.len(), 1);
        assert_eq!(acquisition.descriptors[0].origin, OriginKind::FixedRemote);
        assert_eq!(acquisition.notices.len(), 1);
        assert!(acquisition.notices[0].message.contains("LB.csv"));
    }
}
