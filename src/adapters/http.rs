use crate::config::toml_config::ApiConfig;
use crate::domain::model::{
    MembershipContract, NewContract, NewPatient, NewPayment, PatientId, PatientRecord,
    PaymentRecord, Plan, PlanId,
};
use crate::domain::ports::{PersistencePort, PlanCatalog};
use crate::utils::error::{CollaboratorErrorKind, EnrollmentError, FieldError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// 入口網站 API 回傳的錯誤格式
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    field: Option<String>,
    #[serde(default)]
    errors: Vec<FieldError>,
}

#[derive(Debug, Serialize)]
struct SetParentBody {
    parent_patient_id: Option<PatientId>,
}

/// REST client for the portal API, implementing both collaborator ports.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| EnrollmentError::ConfigError {
            message: format!("Invalid api.base_url '{}': {}", config.base_url, e),
        })?;
        // join() 需要結尾斜線才會保留最後一段路徑
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds()))
            .build()
            .map_err(|e| EnrollmentError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| EnrollmentError::ConfigError {
                message: format!("Cannot build URL for '{}': {}", path, e),
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        tracing::debug!("{} -> HTTP {}", operation, response.status());

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(operation, response).await)
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, operation: &str, builder: RequestBuilder) -> Result<T> {
        let response = self.send(operation, builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| transport_error(operation, e))
    }

    /// 404 視為不存在而非錯誤
    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<Option<T>> {
        match self.fetch(operation, builder).await {
            Ok(value) => Ok(Some(value)),
            Err(EnrollmentError::CollaboratorFailure {
                kind: CollaboratorErrorKind::Rejected { status: 404 },
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn transport_error(operation: &str, error: reqwest::Error) -> EnrollmentError {
    let kind = if error.is_timeout() {
        CollaboratorErrorKind::Timeout
    } else if error.is_decode() {
        CollaboratorErrorKind::Decode
    } else {
        CollaboratorErrorKind::Network
    };
    tracing::warn!("{} failed: {}", operation, error);
    let reason = match kind {
        CollaboratorErrorKind::Timeout => None,
        _ => Some(error.to_string()),
    };
    EnrollmentError::collaborator(operation, kind, reason)
}

async fn status_error(operation: &str, response: Response) -> EnrollmentError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let is_validation = matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
    );
    if is_validation && (!body.errors.is_empty() || body.field.is_some()) {
        let mut errors = body.errors;
        if let Some(field) = body.field {
            errors.push(FieldError::new(
                field,
                body.message.unwrap_or_else(|| "Invalid value".to_string()),
            ));
        }
        return EnrollmentError::ValidationError { errors };
    }

    let kind = if status.is_server_error() {
        CollaboratorErrorKind::Server {
            status: status.as_u16(),
        }
    } else {
        CollaboratorErrorKind::Rejected {
            status: status.as_u16(),
        }
    };
    // 伺服器訊息原樣保留
    let reason = body.message.or_else(|| {
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    EnrollmentError::collaborator(operation, kind, reason)
}

#[async_trait]
impl PersistencePort for HttpBackend {
    async fn get_patient(&self, patient_id: PatientId) -> Result<Option<PatientRecord>> {
        let url = self.endpoint(&format!("patients/{}", patient_id))?;
        self.fetch_optional("get_patient", self.request(Method::GET, url))
            .await
    }

    async fn get_active_contract(
        &self,
        titular_patient_id: PatientId,
    ) -> Result<Option<MembershipContract>> {
        let mut url = self.endpoint("contracts/active")?;
        url.query_pairs_mut()
            .append_pair("titular_patient_id", &titular_patient_id.to_string());
        self.fetch_optional("get_active_contract", self.request(Method::GET, url))
            .await
    }

    async fn list_beneficiaries(&self, titular_patient_id: PatientId) -> Result<Vec<PatientRecord>> {
        let mut url = self.endpoint("patients")?;
        url.query_pairs_mut()
            .append_pair("parent_patient_id", &titular_patient_id.to_string());
        self.fetch("list_beneficiaries", self.request(Method::GET, url))
            .await
    }

    async fn list_unaffiliated_patients(&self) -> Result<Vec<PatientRecord>> {
        let url = self.endpoint("patients/unaffiliated")?;
        self.fetch("list_unaffiliated_patients", self.request(Method::GET, url))
            .await
    }

    async fn create_person(&self, request: &NewPatient) -> Result<PatientRecord> {
        let url = self.endpoint("patients")?;
        self.fetch("create_person", self.request(Method::POST, url).json(request))
            .await
    }

    async fn set_parent(
        &self,
        patient_id: PatientId,
        parent_patient_id: Option<PatientId>,
    ) -> Result<PatientRecord> {
        let url = self.endpoint(&format!("patients/{}/parent", patient_id))?;
        let body = SetParentBody { parent_patient_id };
        self.fetch("set_parent", self.request(Method::PATCH, url).json(&body))
            .await
    }

    async fn create_contract(&self, request: &NewContract) -> Result<MembershipContract> {
        let url = self.endpoint("contracts")?;
        self.fetch("create_contract", self.request(Method::POST, url).json(request))
            .await
    }

    async fn create_payment(&self, request: &NewPayment) -> Result<PaymentRecord> {
        let url = self.endpoint("payments")?;
        self.fetch("create_payment", self.request(Method::POST, url).json(request))
            .await
    }
}

#[async_trait]
impl PlanCatalog for HttpBackend {
    async fn get_plan(&self, plan_id: PlanId) -> Result<Plan> {
        let url = self.endpoint(&format!("plans/{}", plan_id))?;
        self.fetch_optional("get_plan", self.request(Method::GET, url))
            .await?
            .ok_or(EnrollmentError::PlanNotFound { plan_id })
    }
}
