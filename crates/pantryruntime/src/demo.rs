//! Synthetic output used when a real external call is unavailable.

use pantrycore::InventoryItem;

/// Prefix on every demo-mode log line.
pub const DEMO_TAG: &str = "[demo]";

/// A clearly-labeled stand-in for an AI recipe suggestion.
pub fn recipe_suggestion(item: &InventoryItem) -> String {
    let name = if item.name.is_empty() { "this item" } else { item.name.as_str() };
    let category = item.category.as_deref().unwrap_or_default().to_ascii_lowercase();
    let idea = match category.as_str() {
        "dairy" => format!("Creamy {} pasta: simmer with garlic, toss with penne and parmesan.", name),
        "produce" | "vegetables" | "fruit" => {
            format!("Quick {} stir-fry: slice thin, sear hot with soy and ginger.", name)
        }
        "meat" | "poultry" | "seafood" => {
            format!("Sheet-pan {}: roast at 220C with olive oil, lemon and herbs.", name)
        }
        "bakery" | "bread" => format!("{} bread pudding: cube, soak in custard, bake 40 minutes.", name),
        _ => format!("Use-it-up soup: simmer {} with stock, onion and seasonal vegetables.", name),
    };
    format!("[Demo recipe] {}", idea)
}
