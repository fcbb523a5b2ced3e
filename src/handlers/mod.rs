pub mod chatbot;
pub mod meal_card;
pub mod photo_analyzer;

pub use chatbot::{NutritionChatbot, SendOutcome};
pub use meal_card::MealCard;
pub use photo_analyzer::{PhotoAnalyzer, SelectedImage, ViewState};
