use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::chat::ChartReference;
use crate::models::dataset::{CorrelationPair, DatasetMetadata};
use crate::models::intent::ChartKind;
use crate::services::analytics::{ColumnOutliers, OutlierMethod};

/// Request body for creating a session
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub has_api_key: bool,
    pub has_dataset: bool,
    pub turn_count: usize,
}

/// Response for a successful upload or dataset lookup
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetResponse {
    pub session_id: Uuid,
    pub dataset: DatasetMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub session_id: Uuid,
    pub rows: serde_json::Value,
}

/// Square correlation matrix over `columns`, in that order. Cells are
/// `null` where no coefficient exists (a constant column, too few rows).
#[derive(Debug, Serialize, Deserialize)]
pub struct CorrelationResponse {
    pub session_id: Uuid,
    pub columns: Vec<String>,
    pub matrix: Vec<Vec<Option<f64>>>,
    pub pairs: Vec<CorrelationPair>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutlierResponse {
    pub session_id: Uuid,
    pub method: OutlierMethod,
    pub columns: Vec<ColumnOutliers>,
}

/// Chart requested directly rather than through chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRequest {
    pub kind: ChartKind,
    /// Kind-dependent: x then y, names then values, or a single column.
    /// A heatmap with no columns covers every numeric column.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub bins: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChartResponse {
    pub session_id: Uuid,
    pub chart: ChartReference,
    /// `data:image/svg+xml;base64,...`
    pub data_uri: String,
}

/// Error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status_code: u16,
}
