//! Typed operations over the RFP backend endpoints.
use super::ApiClient;
use crate::error::{ApiError, ValidationError};
use crate::model::{
    CompanyDocsStatus, CompanyDocsUpload, DocType, GeneratedResponse, MessageResponse,
    PasswordResetRequest, ProposalArtifacts, RefinedText, RfpDocument,
};
use crate::upload::FilePart;
use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};

const UPLOAD_RFP: &str = "/api/upload-rfp";
const UPLOAD_COMPANY_DOCS: &str = "/api/upload-company-docs";
const CHECK_COMPANY_DOCS: &str = "/api/check-company-docs";
const GENERATE_RESPONSE: &str = "/api/generate-response";
const FINAL_RFP: &str = "/api/final-rfp";
const DIRECT_PASSWORD_RESET: &str = "/api/password/direct-reset";

const UPLOAD_FIELD: &str = "files";

const MIN_PASSWORD_LEN: usize = 8;

/// Remote operations the macro-steps depend on.
///
/// Downloads also touch the local disk, so they report through `anyhow`; a
/// remote failure is still an [`ApiError`] inside it.
pub trait RfpBackend {
    fn upload_rfp(&self, parts: &[FilePart]) -> Result<RfpDocument, ApiError>;
    fn generate_response(&self, document: &RfpDocument) -> Result<GeneratedResponse, ApiError>;
    fn refine_response(&self, rfp_id: &str, prompt: &str) -> Result<RefinedText, ApiError>;
    fn finalize_proposal(
        &self,
        response: &GeneratedResponse,
    ) -> Result<ProposalArtifacts, ApiError>;
    fn download_document(
        &self,
        rfp_id: &str,
        doc_type: DocType,
        dest_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf>;
}

/// HTTP implementation of the backend contract.
#[derive(Clone)]
pub struct RfpService {
    client: ApiClient,
}

impl RfpService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn upload_company_docs(&self, parts: &[FilePart]) -> Result<CompanyDocsUpload, ApiError> {
        self.client
            .post_form(UPLOAD_COMPANY_DOCS, parts, UPLOAD_FIELD)
    }

    /// Deployments without the status endpoint report "no documents".
    pub fn check_company_docs(&self) -> Result<CompanyDocsStatus, ApiError> {
        match self.client.get_json(CHECK_COMPANY_DOCS) {
            Ok(status) => Ok(status),
            Err(err) if err.status == 404 || err.status == 405 => {
                tracing::debug!(status = err.status, "company docs status endpoint missing");
                Ok(CompanyDocsStatus::default())
            }
            Err(err) => Err(err),
        }
    }

    pub fn direct_password_reset(
        &self,
        request: &PasswordResetRequest,
    ) -> Result<MessageResponse, ApiError> {
        self.client.post_json(DIRECT_PASSWORD_RESET, request)
    }
}

impl RfpBackend for RfpService {
    fn upload_rfp(&self, parts: &[FilePart]) -> Result<RfpDocument, ApiError> {
        self.client.post_form(UPLOAD_RFP, parts, UPLOAD_FIELD)
    }

    fn generate_response(&self, document: &RfpDocument) -> Result<GeneratedResponse, ApiError> {
        self.client.post_json(GENERATE_RESPONSE, document)
    }

    fn refine_response(&self, rfp_id: &str, prompt: &str) -> Result<RefinedText, ApiError> {
        let path = format!(
            "/api/employee/rfps/{}/custom-prompt-edit",
            urlencoding::encode(rfp_id)
        );
        self.client.post_json(&path, &json!({ "prompt": prompt }))
    }

    fn finalize_proposal(
        &self,
        response: &GeneratedResponse,
    ) -> Result<ProposalArtifacts, ApiError> {
        self.client.post_json(FINAL_RFP, response)
    }

    fn download_document(
        &self,
        rfp_id: &str,
        doc_type: DocType,
        dest_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf> {
        let path = format!(
            "/api/download-document/{}/{doc_type}",
            urlencoding::encode(rfp_id)
        );
        self.client.get_binary(&path, dest_dir, filename)
    }
}

/// Client-side checks run before a reset request is sent.
pub fn validate_password_reset(request: &PasswordResetRequest) -> Result<(), ValidationError> {
    if request.email.trim().is_empty() {
        return Err(ValidationError::MissingField("email"));
    }
    if request.new_password.is_empty() {
        return Err(ValidationError::MissingField("new password"));
    }
    if request.confirm_password.is_empty() {
        return Err(ValidationError::MissingField("password confirmation"));
    }
    if request.new_password != request.confirm_password {
        return Err(ValidationError::PasswordMismatch);
    }
    if request.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}
