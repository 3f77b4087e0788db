//! Diet plan generation.

use crate::error::ContentError;
use crate::extract::parse_json_object;
use crate::prompt::Nonce;
use crate::service::{GenerationConfig, GenerationRequest, GenerativeService, DIET_TIMEOUT};
use ager_core::{age_key, DietBucket};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BmiBand {
    Underweight,
    Normal,
    Overweight,
    Obese,
    Unknown,
}

impl BmiBand {
    pub fn from_bmi(bmi: Option<f64>) -> Self {
        match bmi {
            Some(b) if !b.is_finite() || b <= 0.0 => Self::Unknown,
            Some(b) if b < 18.5 => Self::Underweight,
            Some(b) if b < 25.0 => Self::Normal,
            Some(b) if b < 30.0 => Self::Overweight,
            Some(_) => Self::Obese,
            None => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Underweight => "underweight",
            Self::Normal => "normal",
            Self::Overweight => "overweight",
            Self::Obese => "obese",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BmiBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BMI from height in centimetres and weight in kilograms, two decimals.
pub fn compute_bmi(height_cm: f64, weight_kg: f64) -> Option<f64> {
    if !(height_cm > 0.0 && weight_kg > 0.0) || !height_cm.is_finite() || !weight_kg.is_finite() {
        return None;
    }
    let metres = height_cm / 100.0;
    Some((weight_kg / (metres * metres) * 100.0).round() / 100.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "dosage")]
    pub dose: Option<String>,
    #[serde(default, alias = "frequency")]
    pub schedule: Option<String>,
}

impl fmt::Display for Medication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let extras: Vec<&str> = [self.dose.as_deref(), self.schedule.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !extras.is_empty() {
            write!(f, " ({})", extras.join(", "))?;
        }
        Ok(())
    }
}

/// Validated diet-plan inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct DietProfile {
    pub age: f64,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub bmi: Option<f64>,
    pub gender: Option<String>,
    pub notes: Option<String>,
    pub medications: Vec<Medication>,
}

impl DietProfile {
    /// Caller-supplied BMI if sane, otherwise computed.
    pub fn effective_bmi(&self) -> Option<f64> {
        self.bmi
            .filter(|b| b.is_finite() && *b > 0.0)
            .or_else(|| compute_bmi(self.height_cm, self.weight_kg))
    }

    pub fn band(&self) -> BmiBand {
        BmiBand::from_bmi(self.effective_bmi())
    }

    pub fn bucket(&self) -> DietBucket {
        DietBucket::from_age(self.age)
    }
}

pub fn render_diet_prompt(profile: &DietProfile, nonce: &Nonce) -> String {
    let age = age_key(profile.age);
    let bucket = profile.bucket();
    let height = profile.height_cm;
    let weight = profile.weight_kg;
    let bmi = profile
        .effective_bmi()
        .map(|b| format!("{b:.2}"))
        .unwrap_or_else(|| "unknown".to_string());
    let band = profile.band();
    let gender = profile.gender.as_deref().filter(|g| !g.trim().is_empty()).unwrap_or("unspecified");
    let notes = profile.notes.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or("none");
    let medications = if profile.medications.is_empty() {
        "none".to_string()
    } else {
        profile
            .medications
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    };

    format!(
        r#"You are a registered dietitian. Create a concise, actionable 7-day diet plan (3 meals + 1 snack per day) tailored to the user below.
Include portion guidance and a brief rationale. Avoid medical claims. If inputs are missing, make safe assumptions and state them briefly.
Prefer Indian cuisine dishes and familiar portion units (1 roti ~30g atta, 1 katori ~150 ml), moderate spice, with veg and non-veg options.
Flag food interactions for any listed medication.

REQUEST ID: {nonce} (do not mention it)

CONTEXT:
- Age: {age} (group: {bucket})
- Gender: {gender}
- Height: {height} cm, weight: {weight} kg
- BMI: {bmi} ({band})
- Medications: {medications}
- Notes: {notes}

Output strictly as minified JSON with this schema:
{{
  "overview": string,
  "bmi": {{ "value": number, "band": string }},
  "days": [
    {{ "day": string, "breakfast": string, "lunch": string, "snack": string, "dinner": string }}
  ],
  "tips": [string]
}}
End with 5 general tips in "tips". Do not include any extra text, markdown or explanations.
"#
    )
}

/// A generated plan, re-serialised compactly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DietPlan {
    pub plan_json: String,
    pub bmi: Option<f64>,
    pub band: BmiBand,
}

pub async fn generate_plan(service: &dyn GenerativeService, profile: &DietProfile) -> Result<DietPlan, ContentError> {
    let prompt = render_diet_prompt(profile, &Nonce::fresh());
    let raw = service
        .generate(&GenerationRequest::text(prompt, GenerationConfig::diet(), DIET_TIMEOUT))
        .await?;
    let plan = parse_json_object(&raw)?;

    tracing::info!(age = profile.age, band = %profile.band(), "diet plan generated");
    Ok(DietPlan {
        plan_json: plan.to_string(),
        bmi: profile.effective_bmi(),
        band: profile.band(),
    })
}
