//! Name resolution through the indexer's find API
//!
//! A name resolves by looking up its index multihash, keeping provider results
//! published under the naam context, and decoding the naming record carried in
//! their metadata. The record with the highest sequence wins.

use crate::error::{ConfigError, ResolveError};
use crate::http_client::HttpClient;
use crate::options::ResolverOptions;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::Utc;
use http::StatusCode;
use naam_chain::error::RecordError;
use naam_chain::{CONTEXT_ID, ChainError, Name, NamingRecord};
use url::Url;

/// Find API response
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FindResponse {
    /// One entry per queried multihash
    #[serde(default)]
    pub multihash_results: Vec<MultihashResult>,
}

/// Providers for one multihash
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultihashResult {
    /// Base64 multihash
    #[serde(default)]
    pub multihash: Option<String>,
    /// Matching provider records
    #[serde(default)]
    pub provider_results: Vec<ProviderResult>,
}

/// One provider record
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderResult {
    /// Base64 context id
    #[serde(rename = "ContextID", default)]
    pub context_id: String,
    /// Base64 metadata
    #[serde(rename = "Metadata", default)]
    pub metadata: String,
    /// Provider address info
    #[serde(rename = "Provider", default)]
    pub provider: Option<ProviderInfo>,
}

/// Provider peer and addresses
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderInfo {
    /// Provider peer id
    #[serde(rename = "ID")]
    pub id: String,
    /// Provider multiaddrs
    #[serde(rename = "Addrs", default)]
    pub addrs: Vec<String>,
}

impl FindResponse {
    /// Naming records published under the naam context
    ///
    /// Results under other contexts are skipped. A naam result whose metadata
    /// does not decode is an error.
    pub fn naming_records(&self) -> Result<Vec<NamingRecord>, ResolveError> {
        let mut records = Vec::new();
        for result in self.multihash_results.iter().flat_map(|r| &r.provider_results) {
            let context_id = BASE64_STANDARD
                .decode(&result.context_id)
                .map_err(|e| ResolveError::InvalidResponse(format!("context id: {e}")))?;
            if context_id != CONTEXT_ID {
                continue;
            }
            let metadata = BASE64_STANDARD
                .decode(&result.metadata)
                .map_err(|e| ResolveError::InvalidResponse(format!("metadata: {e}")))?;
            records.push(NamingRecord::from_metadata(&metadata).map_err(ResolveError::InvalidRecord)?);
        }
        Ok(records)
    }
}

/// Resolves names through an indexer
///
/// Lookups query the name's index multihash directly, so the indexer learns
/// which name is being resolved. Double-hashed reader-private lookups are not
/// supported.
#[derive(Debug, Clone)]
pub struct NameResolver<C> {
    client: C,
    find_url: Url,
    validate: bool,
}

impl<C: HttpClient + Sync> NameResolver<C> {
    /// Create a resolver
    pub fn new(client: C, options: ResolverOptions) -> Result<Self, ConfigError> {
        let find_url = Url::parse(&options.find_url).map_err(|source| ConfigError::Url {
            field: "find URL",
            url: options.find_url.clone(),
            source,
        })?;
        Ok(Self {
            client,
            find_url,
            validate: options.validate,
        })
    }

    /// Lookup URL for a name
    pub fn lookup_url(&self, name: &Name) -> Result<Url, ResolveError> {
        let mh = name.index_multihash().map_err(ResolveError::InvalidName)?;
        let mut url = self.find_url.clone();
        let path = format!(
            "{}/multihash/{}",
            url.path().trim_end_matches('/'),
            multibase::Base::Base58Btc.encode(mh.to_bytes())
        );
        url.set_path(&path);
        Ok(url)
    }

    /// Resolve `name` to its current target path
    pub async fn resolve(&self, name: &str) -> Result<String, ResolveError> {
        self.resolve_record(name)
            .await
            .map(|record| record.value().to_string())
    }

    /// Resolve `name` to its current naming record
    #[tracing::instrument(skip(self))]
    pub async fn resolve_record(&self, name: &str) -> Result<NamingRecord, ResolveError> {
        let parsed = Name::parse(name).map_err(ResolveError::InvalidName)?;
        let url = self.lookup_url(&parsed)?;

        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(url.as_str())
            .header(http::header::ACCEPT, "application/json")
            .body(Vec::new())
            .map_err(|e| ResolveError::Http(Box::new(e)))?;
        let response = self
            .client
            .send_http(request)
            .await
            .map_err(|e| ResolveError::Http(Box::new(e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(ResolveError::NotFound(name.to_string())),
            status => return Err(ResolveError::HttpStatus(status)),
        }

        let found: FindResponse = serde_json::from_slice(response.body())
            .map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
        let record = found
            .naming_records()?
            .into_iter()
            .max_by_key(|record| record.sequence)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;
        tracing::debug!(sequence = record.sequence, "record found");

        if self.validate {
            validate(&record, &parsed)?;
        }
        Ok(record)
    }
}

fn validate(record: &NamingRecord, name: &Name) -> Result<(), ResolveError> {
    record
        .validate_for_name(name, Utc::now())
        .map_err(|e| match e {
            RecordError::NameMismatch { signer, .. } => ResolveError::NameMismatch {
                name: name.to_string(),
                signer,
            },
            RecordError::Expired(at) => ResolveError::Expired(at),
            other => ResolveError::InvalidRecord(ChainError::from(other)),
        })
}
