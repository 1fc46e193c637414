use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::{Error, Result};

/// List-endpoint row. The backend truncates `initial_symptoms` server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_age: Option<u32>,
    #[serde(default)]
    pub patient_gender: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub initial_symptoms: Option<String>,
}

/// Full patient record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_age: Option<u32>,
    #[serde(default)]
    pub patient_gender: Option<String>,
    #[serde(default)]
    pub initial_symptoms: Option<String>,
    #[serde(default)]
    pub patient_history: Option<String>,
    #[serde(default)]
    pub test_results: Option<String>,
    #[serde(default)]
    pub triage_info: Option<TriageInfo>,
    #[serde(default)]
    pub diagnosis_info: Option<DiagnosisInfo>,
    #[serde(default)]
    pub expert_consultation: Option<ExpertConsultation>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
}

impl PatientRecord {
    /// Name for display, never empty.
    pub fn display_name(&self) -> &str {
        self.patient_name.as_deref().unwrap_or("未命名患者")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageInfo {
    #[serde(default)]
    pub triage_level: Option<String>,
    #[serde(default)]
    pub recommended_department: Option<String>,
    #[serde(default)]
    pub triage_basis: Option<String>,
    #[serde(default)]
    pub triage_time: Option<String>,
    #[serde(default)]
    pub triage_questions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisInfo {
    #[serde(default)]
    pub most_likely_disease: Option<String>,
    /// Percentage, 0-100.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub disease_details: Option<Value>,
    #[serde(default)]
    pub recommended_tests: Vec<RecommendedTest>,
    #[serde(default)]
    pub submitted_tests: Vec<SubmittedTest>,
    #[serde(default)]
    pub diagnosis_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpertConsultation {
    #[serde(default)]
    pub consultation_date: Option<String>,
    #[serde(default)]
    pub diagnostic_expert_opinion: Option<String>,
    #[serde(default)]
    pub imaging_expert_opinion: Option<String>,
    #[serde(default)]
    pub treatment_expert_opinion: Option<String>,
    #[serde(default)]
    pub final_diagnosis: Option<String>,
    #[serde(default)]
    pub treatment_plan: Option<String>,
    #[serde(default)]
    pub prognosis: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendedTest {
    pub test_name: String,
    #[serde(default)]
    pub test_description: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmittedTest {
    pub test_name: String,
    #[serde(default)]
    pub test_description: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPatient {
    pub patient_name: String,
    pub patient_age: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_symptoms: Option<String>,
}

/// Partial update; absent fields are left untouched by the backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_symptoms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_history: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteConfirmation {
    pub message: String,
    pub patient_id: String,
}

#[derive(Serialize)]
struct SubmitTestsRequest<'a> {
    submitted_tests: &'a [SubmittedTest],
}

impl ApiClient {
    pub async fn list_patients(&self) -> Result<Vec<PatientSummary>> {
        self.get_json("/api/patients").await
    }

    pub async fn get_patient(&self, patient_id: &str) -> Result<PatientRecord> {
        self.get_json(&format!("/api/patients/{patient_id}")).await
    }

    pub async fn create_patient(&self, patient: &NewPatient) -> Result<PatientRecord> {
        self.post_json("/api/patients", patient).await
    }

    pub async fn update_patient(
        &self,
        patient_id: &str,
        update: &PatientUpdate,
    ) -> Result<PatientRecord> {
        self.put_json(&format!("/api/patients/{patient_id}"), update)
            .await
    }

    pub async fn delete_patient(&self, patient_id: &str) -> Result<DeleteConfirmation> {
        self.delete_json(&format!("/api/patients/{patient_id}")).await
    }

    /// Submit filled-in test results. Empty results are rejected locally; the
    /// backend would refuse them anyway.
    pub async fn submit_test_results(
        &self,
        patient_id: &str,
        submitted_tests: &[SubmittedTest],
    ) -> Result<PatientRecord> {
        if submitted_tests.is_empty() {
            return Err(Error::InvalidInput("no test results to submit".into()));
        }
        for test in submitted_tests {
            if test.result.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "result for {} is empty",
                    test.test_name
                )));
            }
        }
        self.post_json(
            &format!("/api/patients/{patient_id}/submit-tests"),
            &SubmitTestsRequest { submitted_tests },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_deserializes_with_sections_missing() {
        let json = r#"{
            "patient_id": "550e8400-e29b-41d4-a716-446655440000",
            "created_at": "2025-10-20T10:00:00",
            "updated_at": "2025-10-20T10:05:00",
            "patient_name": "张三",
            "patient_age": 45,
            "patient_gender": "男",
            "initial_symptoms": "皮肤红肿、发热、气促",
            "patient_history": null,
            "triage_info": null,
            "diagnosis_info": null,
            "expert_consultation": null,
            "conversation_history": []
        }"#;
        let record: PatientRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.display_name(), "张三");
        assert_eq!(record.patient_age, Some(45));
        assert!(record.triage_info.is_none());
        assert!(record.conversation_history.is_empty());
    }

    #[test]
    fn diagnosis_tests_round_trip_backend_shape() {
        let json = r#"{
            "most_likely_disease": "肺炎",
            "confidence": 87.5,
            "recommended_tests": [
                {"test_name": "血常规", "test_description": "全血细胞计数", "selected": true, "result": null}
            ],
            "submitted_tests": [],
            "diagnosis_time": "2025-10-20 10:00:00"
        }"#;
        let info: DiagnosisInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.recommended_tests.len(), 1);
        assert!(info.recommended_tests[0].selected);
        assert_eq!(info.confidence, Some(87.5));
    }

    #[test]
    fn update_serializes_only_set_fields() {
        let update = PatientUpdate {
            patient_history: Some("高血压十年".into()),
            ..PatientUpdate::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"patient_history": "高血压十年"})
        );
    }
}
