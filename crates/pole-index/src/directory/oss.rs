use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use rusty_s3::actions::ListObjectsV2;
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use url::Url;

use super::{
    lock_uri, parse_epoch, segment_file_name, CancelToken, Directory, DirectoryStats,
    LockProvider, WriteTo,
};
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SIGN_TTL: Duration = Duration::from_secs(600);

/// Segment store on an S3-compatible bucket.
///
/// Configured by `oss://<bucket>/<prefix>?endpoint=…&access_key_id=…&
/// access_key_secret=…`; query values fall back to the `OSS_ENDPOINT_URL`,
/// `OSS_ACCESS_KEY_ID` and `OSS_ACCESS_KEY_SECRET` environment variables.
/// Requests are presigned with `rusty-s3` and executed with a blocking
/// HTTP client; consistency is per object, so `sync` is a no-op.
pub struct OssDirectory {
    bucket: Bucket,
    credentials: Credentials,
    client: Client,
    prefix: String,
    lock_token: String,
    locks: Option<Arc<dyn LockProvider>>,
}

impl OssDirectory {
    pub fn new(url: &Url, index: &str, locks: Option<Arc<dyn LockProvider>>) -> Result<Self> {
        if url.scheme() != "oss" {
            return Err(Error::InvalidUri(url.to_string()));
        }
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let endpoint = setting(&query, "endpoint", "OSS_ENDPOINT_URL")
            .ok_or_else(|| Error::InvalidUri(format!("{url}: no endpoint configured")))?;
        let access_key_id = setting(&query, "access_key_id", "OSS_ACCESS_KEY_ID")
            .ok_or_else(|| Error::InvalidUri(format!("{url}: no access key configured")))?;
        let access_key_secret = setting(&query, "access_key_secret", "OSS_ACCESS_KEY_SECRET")
            .ok_or_else(|| Error::InvalidUri(format!("{url}: no access secret configured")))?;
        let region = query.get("region").cloned().unwrap_or_else(|| "us-east-1".to_string());

        let endpoint: Url = endpoint
            .parse()
            .map_err(|err| Error::InvalidUri(format!("endpoint: {err}")))?;
        let bucket_name = url
            .host_str()
            .ok_or_else(|| Error::InvalidUri(format!("{url}: no bucket")))?
            .to_string();
        let bucket = Bucket::new(endpoint, UrlStyle::Path, bucket_name, region)
            .map_err(|err| Error::InvalidUri(err.to_string()))?;

        let mut prefix = url.path().trim_matches('/').to_string();
        if prefix.is_empty() {
            prefix = index.to_string();
        } else {
            prefix = format!("{prefix}/{index}");
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::storage)?;

        Ok(Self {
            bucket,
            credentials: Credentials::new(access_key_id, access_key_secret),
            client,
            prefix,
            lock_token: lock_uri(&url[..url::Position::AfterPath], index),
            locks,
        })
    }

    fn key_of(&self, kind: &str, epoch: u64) -> String {
        format!("{}/{}", self.prefix, segment_file_name(kind, epoch))
    }

    /// Every object key below this index's prefix, with its size.
    fn list_keys(&self) -> Result<Vec<(String, u64)>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.query_mut().insert("prefix", format!("{}/", self.prefix));
            if let Some(token) = continuation.take() {
                action.query_mut().insert("continuation-token", token);
            }
            let response = self
                .client
                .get(action.sign(SIGN_TTL))
                .send()
                .map_err(Error::storage)?;
            if !response.status().is_success() {
                return Err(Error::storage(format!("list failed: {}", response.status())));
            }
            let body = response.text().map_err(Error::storage)?;
            let parsed = ListObjectsV2::parse_response(&body).map_err(Error::storage)?;
            keys.extend(parsed.contents.into_iter().map(|object| (object.key, object.size)));
            match parsed.next_continuation_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }
}

fn setting(query: &HashMap<String, String>, key: &str, env_key: &str) -> Option<String> {
    query.get(key).cloned().filter(|v| !v.is_empty()).or_else(|| env::var(env_key).ok())
}

impl Directory for OssDirectory {
    fn setup(&self, read_only: bool) -> Result<()> {
        let head = self.bucket.head_bucket(Some(&self.credentials));
        let response = self
            .client
            .head(head.sign(SIGN_TTL))
            .send()
            .map_err(Error::storage)?;
        if response.status().is_success() {
            return Ok(());
        }
        if read_only {
            return Err(Error::storage(format!(
                "bucket `{}` is not reachable: {}",
                self.bucket.name(),
                response.status()
            )));
        }
        let create = self.bucket.create_bucket(&self.credentials);
        let response = self
            .client
            .put(create.sign(SIGN_TTL))
            .send()
            .map_err(Error::storage)?;
        if !response.status().is_success() {
            return Err(Error::storage(format!(
                "creating bucket `{}` failed: {}",
                self.bucket.name(),
                response.status()
            )));
        }
        Ok(())
    }

    fn list(&self, kind: &str) -> Result<Vec<u64>> {
        let mut epochs = Vec::new();
        for (key, _) in self.list_keys()? {
            let name = key.rsplit('/').next().unwrap_or(&key);
            if !name.ends_with(kind) {
                continue;
            }
            epochs.push(parse_epoch(name, kind)?);
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    fn load(&self, kind: &str, epoch: u64) -> Result<Vec<u8>> {
        let key = self.key_of(kind, epoch);
        let action = self.bucket.get_object(Some(&self.credentials), &key);
        let response = self
            .client
            .get(action.sign(SIGN_TTL))
            .send()
            .map_err(Error::storage)?;
        if !response.status().is_success() {
            return Err(Error::storage(format!("loading `{key}` failed: {}", response.status())));
        }
        Ok(response.bytes().map_err(Error::storage)?.to_vec())
    }

    fn persist(
        &self,
        kind: &str,
        epoch: u64,
        source: &dyn WriteTo,
        cancel: &CancelToken,
    ) -> Result<()> {
        let key = self.key_of(kind, epoch);
        let mut staging = Vec::new();
        source.write_to(&mut staging, cancel).map_err(Error::storage)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(key));
        }

        let action = self.bucket.put_object(Some(&self.credentials), &key);
        let response = self
            .client
            .put(action.sign(SIGN_TTL))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(staging)
            .send()
            .map_err(Error::storage)?;
        if !response.status().is_success() {
            return Err(Error::storage(format!("storing `{key}` failed: {}", response.status())));
        }
        Ok(())
    }

    fn remove(&self, kind: &str, epoch: u64) -> Result<()> {
        let key = self.key_of(kind, epoch);
        let action = self.bucket.delete_object(Some(&self.credentials), &key);
        let response = self
            .client
            .delete(action.sign(SIGN_TTL))
            .send()
            .map_err(Error::storage)?;
        if !response.status().is_success() {
            return Err(Error::storage(format!("removing `{key}` failed: {}", response.status())));
        }
        Ok(())
    }

    fn stats(&self) -> Result<DirectoryStats> {
        let mut stats = DirectoryStats::default();
        for (_, size) in self.list_keys()? {
            stats.file_count += 1;
            stats.byte_count += size;
        }
        Ok(stats)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn lock(&self) -> Result<()> {
        match &self.locks {
            Some(locks) => locks.lock(&self.lock_token),
            None => Ok(()),
        }
    }

    fn unlock(&self) -> Result<()> {
        match &self.locks {
            Some(locks) => locks.unlock(&self.lock_token),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_settings_are_extracted() {
        let url = Url::parse(
            "oss://segments/pole?endpoint=http://127.0.0.1:9000&access_key_id=ak&access_key_secret=sk",
        )
        .unwrap();
        let dir = OssDirectory::new(&url, "t", None).unwrap();
        assert_eq!(dir.prefix, "pole/t");
        assert_eq!(dir.key_of(".seg", 1), "pole/t/000000000001.seg");
        assert_eq!(dir.lock_token, "oss://segments/pole/t");
    }

    #[test]
    fn missing_endpoint_is_an_invalid_uri() {
        let url = Url::parse("oss://segments/pole?access_key_id=ak&access_key_secret=sk").unwrap();
        std::env::remove_var("OSS_ENDPOINT_URL");
        assert!(matches!(OssDirectory::new(&url, "t", None), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn empty_prefix_falls_back_to_the_index_name() {
        let url = Url::parse(
            "oss://segments?endpoint=http://127.0.0.1:9000&access_key_id=ak&access_key_secret=sk",
        )
        .unwrap();
        let dir = OssDirectory::new(&url, "t", None).unwrap();
        assert_eq!(dir.prefix, "t");
    }
}
