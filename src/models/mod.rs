use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroNutrients {
    pub protein: f64,        // grams
    pub carbohydrates: f64,  // grams
    pub fat: f64,            // grams
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroNutrient {
    pub name: String,
    pub amount: f64,
    pub unit: String,  // mg, mcg, IU...
}

/// Structured nutrition analysis of a single meal photo, as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub meal_name: String,
    pub description: String,
    pub total_calories: u32,
    pub macros: MacroNutrients,
    pub micronutrients: Vec<MicroNutrient>,
    pub nova_score: u8,    // 1 = unprocessed ... 4 = ultra-processed
    pub health_score: u8,  // 0-100
    pub health_tips: Vec<String>,
}

impl AnalysisResult {
    /// Check the value ranges the response schema cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=4).contains(&self.nova_score) {
            return Err(format!("novaScore out of range: {}", self.nova_score));
        }
        if self.health_score > 100 {
            return Err(format!("healthScore out of range: {}", self.health_score));
        }

        let macros = [
            ("protein", self.macros.protein),
            ("carbohydrates", self.macros.carbohydrates),
            ("fat", self.macros.fat),
        ];
        for (name, grams) in macros {
            if !grams.is_finite() || grams < 0.0 {
                return Err(format!("macro {} must be a non-negative number, got {}", name, grams));
            }
        }

        if let Some(bad) = self
            .micronutrients
            .iter()
            .find(|m| !m.amount.is_finite() || m.amount < 0.0)
        {
            return Err(format!("micronutrient {} has invalid amount {}", bad.name, bad.amount));
        }

        Ok(())
    }
}

/// Citation attached to an assistant message by search grounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: None,
        }
    }
}
