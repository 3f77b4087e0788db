//! Prompt assembly for the generative service.
//!
//! Every prompt is plain string construction and cannot fail. Each render
//! takes a [`Nonce`] so that identical inputs still produce distinct
//! requests; the nonce only appears on its own labelled line.

use ager_core::{age_key, AgeBucket, FeatureDescriptor};
use chrono::{SecondsFormat, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use uuid::Uuid;

pub const FOCUS_POOL: [&str; 12] = [
    "sleep quality",
    "stress relief",
    "mobility & flexibility",
    "cardio fitness",
    "strength training",
    "healthy eating",
    "hydration",
    "posture & ergonomics",
    "mindfulness & mood",
    "time-efficient routines",
    "social connection",
    "healthy habits at work/school",
];

pub const TONE_POOL: [&str; 5] = [
    "friendly coach",
    "evidence-informed",
    "simple & practical",
    "motivational",
    "calm & supportive",
];

/// Per-call freshness token: UTC timestamp plus a random UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(String);

impl Nonce {
    pub fn fresh() -> Self {
        Self(format!(
            "{}-{}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            Uuid::new_v4()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Randomised emphasis for one wellness generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleHints {
    pub focus_areas: Vec<&'static str>,
    pub tone: &'static str,
}

pub fn sample_style<R: Rng + ?Sized>(rng: &mut R) -> StyleHints {
    StyleHints {
        focus_areas: FOCUS_POOL.choose_multiple(rng, 3).copied().collect(),
        tone: TONE_POOL.choose(rng).copied().unwrap_or(TONE_POOL[0]),
    }
}

fn bucket_emphasis(bucket: AgeBucket) -> &'static str {
    match bucket {
        AgeBucket::Child => "playful activity, balanced meals, sleep routines and safety; address a parent or caregiver where useful",
        AgeBucket::Teen => "growth-friendly nutrition, sport, sleep hygiene, screen-time balance and mental health",
        AgeBucket::Twenties => "building sustainable routines, fitness goals, stress and preventive care",
        AgeBucket::Thirties => "maintaining fitness around work and family, stress management and preventive screenings",
        AgeBucket::Forties => "metabolic health, strength retention, recovery and regular check-ups",
        AgeBucket::FiftiesToEarlySeniors => "joint health, heart health, screenings and staying active",
        AgeBucket::Senior => "mobility, balance and fall prevention, cognitive health and social connection",
    }
}

/// Request for one structured wellness payload.
#[derive(Debug, Clone)]
pub struct WellnessPrompt<'a> {
    pub age: f64,
    pub bucket: AgeBucket,
    pub features: Option<&'a FeatureDescriptor>,
    pub style: StyleHints,
}

impl WellnessPrompt<'_> {
    pub fn render(&self, nonce: &Nonce) -> String {
        let age = age_key(self.age);
        let bucket = self.bucket.as_str();
        let focus = self.style.focus_areas.join(", ");
        let tone = self.style.tone;
        let emphasis = bucket_emphasis(self.bucket);
        let features = match self.features.filter(|f| f.face_detected) {
            Some(descriptor) => descriptor.summary(),
            None => "none (use generic guidance for this age)".to_string(),
        };

        format!(
            r#"You are Ager, generating wellness content STRICTLY as JSON for a user who is {age} years old (bucket: {bucket}).

NONCE: {nonce}
Use this nonce to vary wording, examples, and item choices each time. Do not mention the nonce.

Focus areas to emphasize in this response: {focus}
Desired tone: {tone}
Age-appropriate emphasis: {emphasis}

Return ONLY valid JSON with this exact structure and keys:
{{
  "profileTitle": "string",
  "intro": "short 1-2 sentence intro personalized for the age",
  "tipsTitle": "Health Tips for Your Age",
  "tips": "concise age-specific paragraph (3-5 sentences)",
  "productsTitle": "Recommended Products",
  "products": [
    {{"title": "string", "subtitle": "string", "image": "https://..."}},
    {{"title": "string", "subtitle": "string", "image": "https://..."}},
    {{"title": "string", "subtitle": "string", "image": "https://..."}}
  ],
  "articlesTitle": "Health Articles",
  "articles": [
    {{"title": "string", "summary": "2-3 sentences", "image": "https://..."}},
    {{"title": "string", "summary": "2-3 sentences", "image": "https://..."}},
    {{"title": "string", "summary": "2-3 sentences", "image": "https://..."}}
  ]
}}

STRICT RULES:
- Output must be valid JSON only (no markdown, no prose outside JSON).
- Exactly 3 products and exactly 3 articles.
- Vary content on every request (different angles and examples, the selected focus areas, and tone).
- Image values must be direct HTTPS links to image files, not product or article pages.
- Avoid medical claims; suggest consulting professionals when appropriate.
- Consider facial feature insights if present to gently tailor tone (do not mention them explicitly): {features}
"#
        )
    }
}

/// Everything the chat prompt adapts to.
#[derive(Debug, Clone)]
pub struct ChatPrompt<'a> {
    pub message: &'a str,
    pub age: f64,
    pub age_group: &'a str,
    pub features: Option<&'a FeatureDescriptor>,
    pub recent_topics: &'a [String],
    pub repetitive: bool,
    pub parenting_mode: bool,
}

const PARENTING_FOCUS: &str = "You are in PARENTING MODE. Focus on expert guidance for parents and caregivers about child development:
- child nutrition and feeding, from infancy to healthy eating habits
- physical development milestones, play and exercise
- sleep routines for different ages
- screen time and digital wellness
- safety and childproofing
- behavioural guidance and positive parenting
- common parenting challenges and practical solutions";

impl ChatPrompt<'_> {
    fn bucket(&self) -> AgeBucket {
        AgeBucket::from_age(self.age)
    }

    fn detected_features(&self) -> Option<&FeatureDescriptor> {
        self.features.filter(|f| f.face_detected)
    }

    fn focus(&self) -> String {
        if self.parenting_mode {
            return PARENTING_FOCUS.to_string();
        }
        let bucket = self.bucket();
        match self.detected_features() {
            Some(descriptor) => {
                let seen = descriptor.summary();
                match bucket {
                    AgeBucket::Child => format!("Based on your facial features ({seen}), focus on: building healthy habits early, proper nutrition for growth, and good hygiene routines."),
                    AgeBucket::Teen => format!("Your facial development ({seen}) indicates: focus on puberty-related health, stress management, and avoiding risky behaviours."),
                    AgeBucket::Twenties => format!("Your facial features ({seen}) suggest: focus on sustainable health routines, managing career stress, and preventive care."),
                    AgeBucket::Thirties | AgeBucket::Forties => format!("Your facial characteristics ({seen}) indicate: focus on maintaining fitness, managing age-related changes, and preventive screenings."),
                    AgeBucket::FiftiesToEarlySeniors | AgeBucket::Senior => format!("Your facial features ({seen}) suggest: focus on mobility, cognitive health, and managing chronic conditions while staying active."),
                }
            }
            None => match bucket {
                AgeBucket::Child => "Focus on: basic hygiene, healthy eating habits, physical activity, sleep routines, and safety.",
                AgeBucket::Teen => "Focus on: nutrition for growth, exercise, mental health awareness, sleep hygiene, and avoiding risky behaviours.",
                AgeBucket::Twenties => "Focus on: healthy routines, stress management, fitness goals, career-related health, and preventive care.",
                AgeBucket::Thirties | AgeBucket::Forties => "Focus on: maintaining fitness, managing stress, preventive screenings, work-life balance, and age-related changes.",
                AgeBucket::FiftiesToEarlySeniors | AgeBucket::Senior => "Focus on: mobility, cognitive health, chronic disease management, social connection, and preventive care.",
            }
            .to_string(),
        }
    }

    pub fn render(&self, nonce: &Nonce) -> String {
        let minor = self.age < 18.0;
        let age = age_key(self.age);
        let age_group = self.age_group;
        let context = if minor { "minor" } else { "adult" };
        let mode = if self.parenting_mode {
            "PARENTING MODE - child development and parenting guidance"
        } else {
            "HEALTH MODE - personal health guidance"
        };
        let safety_level = if minor { "HIGH - user is a minor" } else { "standard adult guidance" };
        let safety = if minor {
            "ALWAYS prioritise safety. Use simple, encouraging language. Never suggest dangerous activities. Encourage talking to trusted adults."
        } else {
            "Provide comprehensive health information in a professional tone and recommend professional consultation when appropriate."
        };
        let topics = if self.recent_topics.is_empty() {
            "none".to_string()
        } else {
            self.recent_topics
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let repetition = if self.repetitive {
            "yes - acknowledge it briefly and offer a new angle instead of repeating earlier advice"
        } else {
            "no - fresh topic"
        };
        let insights = match self.detected_features() {
            Some(descriptor) => format!("From facial analysis: {}", descriptor.summary()),
            None => "No stored facial analysis; use standard age-based guidance.".to_string(),
        };
        let focus = self.focus();
        let message = self.message;

        format!(
            r#"You are Ager, an AI health assistant giving personalised, conversational health guidance.

REQUEST ID: {nonce}
(The request id only keeps replies fresh. Do not mention it.)

USER:
- Age: {age} ({age_group}, {context})
- Mode: {mode}
- Safety level: {safety_level}

CONVERSATION:
- Recent topics: {topics}
- Repeated topic: {repetition}

HEALTH FOCUS:
{focus}

FACIAL FEATURE INSIGHTS:
{insights}

SAFETY:
{safety}

RESPONSE RULES:
- Only answer health-related questions; politely redirect anything else to health topics.
- Answer the specific question directly; give tips only when asked or clearly useful.
- Vary structure between replies and use age-appropriate language.
- Keep it brief: 3-6 short sentences, ideally under 120 words, at most 3 short bullets.
- Plain text only, no markdown headings or bold.

USER QUESTION: "{message}"
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ager_core::{EyeFeatures, FacialFeatures, SkinFeatures};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn descriptor() -> FeatureDescriptor {
        FeatureDescriptor {
            face_detected: true,
            facial_features: FacialFeatures {
                eyes: Some(EyeFeatures {
                    color: Some("brown".into()),
                    shape: None,
                    size: Some("large".into()),
                    brightness: Some("bright".into()),
                }),
                skin: Some(SkinFeatures {
                    tone: Some("warm".into()),
                    texture: Some("smooth".into()),
                    complexion: None,
                }),
                face_shape: Some("oval".into()),
                ..FacialFeatures::default()
            },
            ..FeatureDescriptor::default()
        }
    }

    fn wellness(features: Option<&FeatureDescriptor>) -> WellnessPrompt<'_> {
        WellnessPrompt {
            age: 70.0,
            bucket: AgeBucket::Senior,
            features,
            style: StyleHints { focus_areas: vec!["hydration", "sleep quality", "social connection"], tone: "calm & supportive" },
        }
    }

    #[test]
    fn test_nonce_is_fresh_each_call() {
        let a = Nonce::fresh();
        let b = Nonce::fresh();
        assert_ne!(a, b);
        assert!(a.as_str().contains('T'));
    }

    #[test]
    fn test_sample_style_draws_from_pools() {
        let mut rng = StdRng::seed_from_u64(7);
        let style = sample_style(&mut rng);
        assert_eq!(style.focus_areas.len(), 3);
        assert!(style.focus_areas.iter().all(|f| FOCUS_POOL.contains(f)));
        let mut unique = style.focus_areas.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
        assert!(TONE_POOL.contains(&style.tone));
    }

    #[test]
    fn test_wellness_prompt_embeds_nonce_and_schema() {
        let nonce = Nonce::fresh();
        let text = wellness(None).render(&nonce);
        assert!(text.contains(&format!("NONCE: {nonce}")));
        assert_eq!(text.matches(nonce.as_str()).count(), 1);
        assert!(text.contains("Do not mention the nonce"));
        assert!(text.contains("\"productsTitle\""));
        assert!(text.contains("70 years old (bucket: senior)"));
        assert!(text.contains("hydration, sleep quality, social connection"));
        assert!(text.contains("none (use generic guidance"));
    }

    #[test]
    fn test_wellness_prompt_differs_per_nonce() {
        let prompt = wellness(None);
        assert_ne!(prompt.render(&Nonce::fresh()), prompt.render(&Nonce::fresh()));
    }

    #[test]
    fn test_wellness_prompt_uses_features() {
        let d = descriptor();
        let text = wellness(Some(&d)).render(&Nonce::fresh());
        assert!(text.contains("large brown with bright brightness"));
        assert!(text.contains("oval face shape"));
    }

    #[test]
    fn test_chat_prompt_minor_is_high_safety() {
        let prompt = ChatPrompt {
            message: "How much sleep do I need?",
            age: 15.0,
            age_group: "Teen",
            features: None,
            recent_topics: &[],
            repetitive: false,
            parenting_mode: false,
        };
        let text = prompt.render(&Nonce::fresh());
        assert!(text.contains("HIGH - user is a minor"));
        assert!(text.contains("trusted adults"));
        assert!(text.contains("nutrition for growth"));
        assert!(text.contains("Recent topics: none"));
    }

    #[test]
    fn test_chat_prompt_feature_aware_and_repetitive() {
        let d = descriptor();
        let topics = vec!["knee pain".to_string()];
        let prompt = ChatPrompt {
            message: "more on knee pain",
            age: 55.0,
            age_group: "Adult",
            features: Some(&d),
            recent_topics: &topics,
            repetitive: true,
            parenting_mode: false,
        };
        let text = prompt.render(&Nonce::fresh());
        assert!(text.contains("standard adult guidance"));
        assert!(text.contains("From facial analysis"));
        assert!(text.contains("mobility, cognitive health"));
        assert!(text.contains("\"knee pain\""));
        assert!(text.contains("offer a new angle"));
    }

    #[test]
    fn test_chat_prompt_parenting_mode_overrides_focus() {
        let prompt = ChatPrompt {
            message: "toddler won't sleep",
            age: 32.0,
            age_group: "Adult",
            features: None,
            recent_topics: &[],
            repetitive: false,
            parenting_mode: true,
        };
        let text = prompt.render(&Nonce::fresh());
        assert!(text.contains("PARENTING MODE"));
        assert!(text.contains("childproofing"));
    }
}
