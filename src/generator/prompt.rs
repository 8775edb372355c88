//! Prompt construction for the completion call.

use crate::catalog::CatalogSnapshot;
use crate::expr::Func;

/// Build the prompt for one request against one catalog snapshot.
pub fn build_prompt(request: &str, catalog: &CatalogSnapshot) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You define calculated fields for a semantic view. Reply with one JSON object and nothing else:\n",
    );
    prompt.push_str(
        "{\"name\": \"UPPER_SNAKE_CASE\", \"displayName\": \"...\", \"expr\": \"...\", \"type\": \"NUMBER|VARCHAR|BOOLEAN|DATE|TIMESTAMP\"}\n\n",
    );
    prompt.push_str("The expression is a single scalar SQL expression over these columns:\n");
    for column in &catalog.columns {
        prompt.push_str(&format!("- {} ({})", column.key(), column.data_type));
        if column.display_name != column.name {
            prompt.push_str(&format!(" \"{}\"", column.display_name));
        }
        if !column.synonyms.is_empty() {
            let synonyms: Vec<&str> = column.synonyms.iter().map(String::as_str).collect();
            prompt.push_str(&format!(" also called: {}", synonyms.join(", ")));
        }
        prompt.push('\n');
    }

    let functions: Vec<&str> = Func::ALL.iter().map(|f| f.name()).collect();
    prompt.push_str(&format!("\nAllowed functions: {}.\n", functions.join(", ")));
    prompt.push_str("Use only the listed columns. No statements, no subqueries, no semicolons.\n\n");
    prompt.push_str("Request: ");
    prompt.push_str(request.trim());
    prompt
}
