use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

const MODULE_RECAP: &str = "recap";

pub const MONTH_PLACEHOLDER: &str = "{{MONTH}}";

const DEFAULT_RECAP_MODEL: &str = "gpt-4o";

const DEFAULT_RECAP_INSTRUCTIONS: &str = r#"You process journal entry data and return a structured JSON object. The user message contains a JSON array of journal entries for the month of {{MONTH}}, each with a name, date, emoji mood tag, and summary. Create a monthly recap for an emotional journal app.

### Instructions:
1. ONLY return the JSON object. Do not include any additional text, explanations, markdown fences, or comments.
2. The JSON must strictly match this schema:
   {
      "recapName": "string",
      "month": "ISO-8601 date string",
      "highs": [
          { "title": "string", "description": "string" }
      ],
      "lows": [
          { "title": "string", "description": "string" }
      ],
      "moodSummary": { "<emoji>": number, ... },
      "summary": "string",
      "favoriteDay": { "date": "ISO-8601 date string", "description": "string" },
      "totalEntries": number
   }
3. moodSummary maps each emoji that appears in the entries to its occurrence count. totalEntries is the number of entries provided.
4. If the input is ambiguous, make reasonable assumptions but adhere to the schema.

Return only the JSON object."#;

/// Model and prompt configuration for the recap generator, stored in the
/// `module_configs` table so it can be changed without a redeploy.
#[derive(Clone, Debug)]
pub struct RecapSettings {
    pub model: String,
    pub prompts: RecapPrompts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecapPrompts {
    pub instructions: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecapModels {
    generation: String,
}

#[derive(sqlx::FromRow)]
struct ModuleConfigRow {
    models: Value,
    prompts: Value,
}

impl RecapSettings {
    pub async fn ensure_defaults(pool: &PgPool) -> Result<()> {
        let models = serde_json::to_value(RecapModels {
            generation: DEFAULT_RECAP_MODEL.to_string(),
        })?;
        let prompts = serde_json::to_value(RecapPrompts {
            instructions: DEFAULT_RECAP_INSTRUCTIONS.to_string(),
        })?;

        sqlx::query(
            "INSERT INTO module_configs (module_name, models, prompts) VALUES ($1, $2, $3)
             ON CONFLICT (module_name) DO NOTHING",
        )
        .bind(MODULE_RECAP)
        .bind(&models)
        .bind(&prompts)
        .execute(pool)
        .await
        .context("failed to seed default recap configuration")?;

        Ok(())
    }

    pub async fn load(pool: &PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, ModuleConfigRow>(
            "SELECT models, prompts FROM module_configs WHERE module_name = $1",
        )
        .bind(MODULE_RECAP)
        .fetch_optional(pool)
        .await
        .context("failed to load recap configuration from database")?
        .ok_or_else(|| anyhow!("recap module configuration is missing"))?;

        let models: RecapModels =
            serde_json::from_value(row.models).context("invalid recap models configuration")?;
        let prompts: RecapPrompts =
            serde_json::from_value(row.prompts).context("invalid recap prompts configuration")?;

        Ok(Self {
            model: models.generation,
            prompts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_instructions_carry_month_placeholder() {
        assert!(DEFAULT_RECAP_INSTRUCTIONS.contains(MONTH_PLACEHOLDER));
    }

    #[test]
    fn default_prompts_round_trip_through_json() {
        let prompts = RecapPrompts {
            instructions: DEFAULT_RECAP_INSTRUCTIONS.to_string(),
        };
        let value = serde_json::to_value(&prompts).unwrap();
        let parsed: RecapPrompts = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.instructions, prompts.instructions);
    }
}
