//! HTTP backend: JSON over blocking `reqwest`.
//!
//! Every request body carries the developer token. Each endpoint has its own
//! request and response shape; responses all carry the `error` field.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::model::{
    Constructed, DetailLevel, GeoFilter, JobSummary, MapId, MapStatus, StatusReport,
};

use super::{Backend, BackendError, MapPayload, Result, Status};

/// Talks to the mapping service at `server`.
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    server: String,
    token: String,
}

impl HttpBackend {
    pub fn new(server: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.server)
    }

    /// POST `body` to `endpoint` and decode the reply, mapping the wire
    /// `error` field to a [`Status`].
    fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned + WireReply,
    {
        let response = self.client.post(self.url(endpoint)).json(body).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Http(status.as_u16()));
        }

        let text = response.text()?;
        decode(&text)
    }
}

/// Parse a response body and check its status.
fn decode<R: DeserializeOwned + WireReply>(text: &str) -> Result<R> {
    let reply: R = serde_json::from_str(text)?;
    Status::from_wire(reply.error()).into_result()?;
    Ok(reply)
}

impl Backend for HttpBackend {
    fn list_jobs(&self, bank: u32, filter: Option<&GeoFilter>) -> Result<Vec<JobSummary>> {
        let reply: JobsReply = match filter {
            Some(f) => self.post(
                "geolist",
                &GeoListRequest {
                    token: &self.token,
                    latitude: f.latitude,
                    longitude: f.longitude,
                    radius: f.radius,
                },
            )?,
            None => self.post(
                "list",
                &BankRequest {
                    token: &self.token,
                    bank,
                },
            )?,
        };
        Ok(reply.jobs.into_iter().map(WireJob::into_summary).collect())
    }

    fn construct(&self, bank: u32, name: &str, detail: DetailLevel) -> Result<Constructed> {
        let reply: ConstructReply = self.post(
            "construct",
            &ConstructRequest {
                token: &self.token,
                bank,
                name,
                feature_count: detail.feature_count(),
            },
        )?;
        Ok(Constructed {
            id: MapId(reply.id),
            image_count: reply.size,
        })
    }

    fn load_map(&self, id: MapId) -> Result<MapPayload> {
        let reply: MapReply = self.post(
            "mapb64",
            &MapRequest {
                token: &self.token,
                id,
            },
        )?;
        Ok(MapPayload {
            b64: reply.b64,
            sha256: reply.sha256_al,
        })
    }

    fn delete_map(&self, id: MapId) -> Result<()> {
        let _: ErrorReply = self.post(
            "delete",
            &MapRequest {
                token: &self.token,
                id,
            },
        )?;
        Ok(())
    }

    fn restore_map_images(&self, id: MapId) -> Result<()> {
        let _: ErrorReply = self.post(
            "restore",
            &MapRequest {
                token: &self.token,
                id,
            },
        )?;
        Ok(())
    }

    fn clear_workspace(&self, bank: u32, delete_anchor: bool) -> Result<()> {
        let _: ErrorReply = self.post(
            "clear",
            &ClearRequest {
                token: &self.token,
                bank,
                anchor: delete_anchor,
            },
        )?;
        Ok(())
    }

    fn status(&self, bank: u32) -> Result<StatusReport> {
        let reply: StatusReply = self.post(
            "status",
            &BankRequest {
                token: &self.token,
                bank,
            },
        )?;
        Ok(StatusReport {
            image_count: reply.image_count,
            user_level: reply.user_level,
            bank_max: reply.bank_max,
        })
    }
}

// ── Request shapes ──

#[derive(Serialize)]
struct BankRequest<'a> {
    token: &'a str,
    bank: u32,
}

#[derive(Serialize)]
struct GeoListRequest<'a> {
    token: &'a str,
    latitude: f64,
    longitude: f64,
    radius: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConstructRequest<'a> {
    token: &'a str,
    bank: u32,
    name: &'a str,
    feature_count: u32,
}

#[derive(Serialize)]
struct MapRequest<'a> {
    token: &'a str,
    id: MapId,
}

#[derive(Serialize)]
struct ClearRequest<'a> {
    token: &'a str,
    bank: u32,
    anchor: bool,
}

// ── Response shapes ──

/// Every response carries an `error` field.
trait WireReply {
    fn error(&self) -> &str;
}

macro_rules! wire_reply {
    ($($ty:ty),*) => {
        $(impl WireReply for $ty {
            fn error(&self) -> &str {
                &self.error
            }
        })*
    };
}

wire_reply!(ErrorReply, JobsReply, ConstructReply, MapReply, StatusReply);

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Debug, Deserialize)]
struct JobsReply {
    error: String,
    #[serde(default)]
    jobs: Vec<WireJob>,
}

/// JSON shape of one listed job.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WireJob {
    id: u32,
    size: u32,
    status: String,
    name: String,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    created: String,
    modified: String,
    sha256_al: String,
}

impl WireJob {
    fn into_summary(self) -> JobSummary {
        JobSummary {
            id: MapId(self.id),
            name: self.name,
            status: MapStatus::from_wire(&self.status),
            image_count: self.size,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            created: self.created,
            modified: self.modified,
            checksum: self.sha256_al,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConstructReply {
    error: String,
    #[serde(default)]
    id: u32,
    #[serde(default)]
    size: u32,
}

#[derive(Debug, Deserialize)]
struct MapReply {
    error: String,
    #[serde(default)]
    sha256_al: String,
    #[serde(default)]
    b64: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusReply {
    error: String,
    #[serde(default)]
    user_level: u32,
    #[serde(default)]
    bank_max: u32,
    #[serde(default)]
    image_count: u32,
}
