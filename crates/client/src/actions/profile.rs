//! Profile edits.

use regusto_core::{UserData, UserUpdate};
use tracing::instrument;

use crate::cache::QueryKey;
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

/// Overlay the fields set in `update` onto `profile`.
fn apply_update(profile: &mut UserData, update: UserUpdate) {
    if let Some(name) = update.name {
        profile.name = Some(name);
    }
    if let Some(email) = update.email {
        profile.email = Some(email);
    }
    if let Some(phone) = update.phone {
        profile.phone = Some(phone);
    }
}

impl ClientContext {
    /// Update the signed-in user's profile, showing the new values right
    /// away.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` for an empty update,
    /// `ClientError::Rejected` when the server refuses it, or the request
    /// error. The cached profile is rolled back on any failure.
    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, update: UserUpdate) -> Result<(), ClientError> {
        let empty = update == UserUpdate::default();
        let edited = update.clone();
        let mutation = Mutation::new("update_profile", "profile")
            .precheck(move |_| {
                if empty {
                    return Err(ClientError::Validation("nothing to update".to_string()));
                }
                Ok(())
            })
            .optimistic(QueryKey::user_data(), move |profile: &mut UserData| {
                apply_update(profile, edited);
                Ok(())
            });

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |_| async move { gateway.update_user(&update).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use regusto_core::UserId;

    use super::*;

    #[test]
    fn test_apply_update_keeps_unset_fields() {
        let mut profile = UserData {
            id: UserId::new("3"),
            name: Some("Ana".into()),
            email: Some("ana@example.com".into()),
            phone: None,
            extra: serde_json::Map::new(),
        };
        apply_update(
            &mut profile,
            UserUpdate {
                phone: Some("555".into()),
                ..UserUpdate::default()
            },
        );
        assert_eq!(profile.name.as_deref(), Some("Ana"));
        assert_eq!(profile.email.as_deref(), Some("ana@example.com"));
        assert_eq!(profile.phone.as_deref(), Some("555"));
    }
}
