use serde::{Deserialize, Serialize};

pub const UNKNOWN_DISEASE: &str = "Unknown";
pub const ANALYSIS_UNAVAILABLE: &str = "AI analysis unavailable.";

/// A triage result with every field populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub disease: String,
    pub causes: String,
    pub precautions: String,
    pub tablets: String,
    pub creams: String,
}

/// The model's JSON as it arrived. Fields may be missing or `null`; unknown
/// keys are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct RawDiagnosis {
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub causes: Option<String>,
    #[serde(default)]
    pub precautions: Option<String>,
    #[serde(default)]
    pub tablets: Option<String>,
    #[serde(default)]
    pub creams: Option<String>,
}

impl From<RawDiagnosis> for Diagnosis {
    fn from(raw: RawDiagnosis) -> Self {
        let unavailable = || ANALYSIS_UNAVAILABLE.to_string();
        Diagnosis {
            disease: raw.disease.unwrap_or_else(|| UNKNOWN_DISEASE.to_string()),
            causes: raw.causes.unwrap_or_else(unavailable),
            precautions: raw.precautions.unwrap_or_else(unavailable),
            tablets: raw.tablets.unwrap_or_else(unavailable),
            creams: raw.creams.unwrap_or_else(unavailable),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_their_fallbacks() {
        let raw: RawDiagnosis =
            serde_json::from_str(r#"{"causes": "Fungal infection", "creams": "Clotrimazole"}"#)
                .unwrap();
        let diagnosis = Diagnosis::from(raw);
        assert_eq!(diagnosis.disease, "Unknown");
        assert_eq!(diagnosis.causes, "Fungal infection");
        assert_eq!(diagnosis.precautions, ANALYSIS_UNAVAILABLE);
        assert_eq!(diagnosis.tablets, ANALYSIS_UNAVAILABLE);
        assert_eq!(diagnosis.creams, "Clotrimazole");
    }

    #[test]
    fn null_is_treated_as_missing() {
        let raw: RawDiagnosis =
            serde_json::from_str(r#"{"disease": null, "tablets": null}"#).unwrap();
        let diagnosis = Diagnosis::from(raw);
        assert_eq!(diagnosis.disease, UNKNOWN_DISEASE);
        assert_eq!(diagnosis.tablets, ANALYSIS_UNAVAILABLE);
    }

    #[test]
    fn non_string_field_is_rejected() {
        assert!(serde_json::from_str::<RawDiagnosis>(r#"{"disease": 42}"#).is_err());
    }

    #[test]
    fn serializes_exactly_five_fields() {
        let value = serde_json::to_value(Diagnosis::from(RawDiagnosis::default())).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["causes", "creams", "disease", "precautions", "tablets"]);
        assert!(object.values().all(|v| v.is_string()));
    }
}
