use serde_json::json;

/// Response schema sent with every analysis request so the model answers
/// with JSON shaped like `AnalysisResult`.
pub fn analysis_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "mealName": { "type": "STRING", "description": "A concise name for the meal." },
            "description": { "type": "STRING", "description": "A short, engaging description of the meal." },
            "totalCalories": { "type": "INTEGER", "description": "Estimated total calories for the entire meal." },
            "macros": {
                "type": "OBJECT",
                "properties": {
                    "protein": { "type": "NUMBER", "description": "Grams of protein." },
                    "carbohydrates": { "type": "NUMBER", "description": "Grams of carbohydrates." },
                    "fat": { "type": "NUMBER", "description": "Grams of fat." }
                },
                "required": ["protein", "carbohydrates", "fat"]
            },
            "micronutrients": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING", "description": "Name of the vitamin or mineral." },
                        "amount": { "type": "NUMBER", "description": "Amount of the nutrient." },
                        "unit": { "type": "STRING", "description": "Unit of measurement (e.g., mg, mcg, IU)." }
                    },
                    "required": ["name", "amount", "unit"]
                }
            },
            "novaScore": { "type": "INTEGER", "description": "NOVA score for food processing (1-4)." },
            "healthScore": { "type": "INTEGER", "description": "An overall health score from 0-100." },
            "healthTips": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "Actionable health tips related to the meal."
            }
        },
        "required": [
            "mealName", "description", "totalCalories", "macros",
            "micronutrients", "novaScore", "healthScore", "healthTips"
        ]
    })
}
