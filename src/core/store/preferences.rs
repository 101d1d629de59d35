use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::types::Preferences;
use super::Store;

impl Store {
    /// A user without a preferences row gets `None`; callers apply defaults.
    pub async fn get_preferences(&self, user_id: i64) -> Result<Option<Preferences>> {
        let db = self.db.lock().await;
        let prefs = db
            .query_row(
                "SELECT user_id, system_prompt, discord_webhook, notify_success, notify_failure
                 FROM preferences WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Preferences {
                        user_id: row.get(0)?,
                        system_prompt: row.get(1)?,
                        discord_webhook: row.get(2)?,
                        notify_success: row.get::<_, i64>(3)? != 0,
                        notify_failure: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }

    #[cfg(test)]
    pub async fn upsert_preferences(&self, prefs: &Preferences) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO preferences (user_id, system_prompt, discord_webhook, notify_success, notify_failure)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 system_prompt = excluded.system_prompt,
                 discord_webhook = excluded.discord_webhook,
                 notify_success = excluded.notify_success,
                 notify_failure = excluded.notify_failure",
            params![
                prefs.user_id,
                prefs.system_prompt,
                prefs.discord_webhook,
                super::bool_to_int(prefs.notify_success),
                super::bool_to_int(prefs.notify_failure),
            ],
        )?;
        Ok(())
    }
}
