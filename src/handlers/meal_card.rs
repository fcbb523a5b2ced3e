use serde::Serialize;

use crate::models::AnalysisResult;

const MAX_MICRONUTRIENTS: usize = 5;

/// Colour band for 0-100 scores. Higher is healthier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    Good,      // green
    Moderate,  // yellow
    Poor,      // red
}

impl ScoreBand {
    pub fn for_score(score: i32) -> Self {
        if score >= 75 {
            ScoreBand::Good
        } else if score >= 50 {
            ScoreBand::Moderate
        } else {
            ScoreBand::Poor
        }
    }
}

pub fn nova_description(nova_score: u8) -> &'static str {
    match nova_score {
        1 => "Unprocessed or minimally processed foods.",
        2 => "Processed culinary ingredients.",
        3 => "Processed foods.",
        4 => "Ultra-processed foods and drinks.",
        _ => "N/A",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NutrientLine {
    pub name: String,
    pub amount: String,
}

/// Display-ready view of an analysis result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealCard {
    pub meal_name: String,
    pub description: String,
    pub calories: u32,
    pub health_score_label: String,
    pub health_band: ScoreBand,
    pub nova_score: u8,
    pub nova_band: ScoreBand,
    pub nova_description: &'static str,
    pub protein: String,
    pub carbohydrates: String,
    pub fat: String,
    pub micronutrients: Vec<NutrientLine>,
    pub health_tips: Vec<String>,
}

impl MealCard {
    pub fn from_result(result: &AnalysisResult) -> Self {
        // NOVA 1 maps to 100, NOVA 4 to 25
        let nova_as_score = 100 - (i32::from(result.nova_score) - 1) * 25;

        Self {
            meal_name: result.meal_name.clone(),
            description: result.description.clone(),
            calories: result.total_calories,
            health_score_label: format!("{}/100", result.health_score),
            health_band: ScoreBand::for_score(i32::from(result.health_score)),
            nova_score: result.nova_score,
            nova_band: ScoreBand::for_score(nova_as_score),
            nova_description: nova_description(result.nova_score),
            protein: format_grams(result.macros.protein),
            carbohydrates: format_grams(result.macros.carbohydrates),
            fat: format_grams(result.macros.fat),
            micronutrients: result
                .micronutrients
                .iter()
                .take(MAX_MICRONUTRIENTS)
                .map(|m| NutrientLine {
                    name: m.name.clone(),
                    amount: format!("{} {}", m.amount, m.unit),
                })
                .collect(),
            health_tips: result.health_tips.clone(),
        }
    }
}

fn format_grams(grams: f64) -> String {
    format!("{:.1}g", grams)
}
