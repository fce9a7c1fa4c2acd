//! Tenant MFA policy evaluation. Pure decision logic over the tenant's
//! enforcement settings and the user's enrollment state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::Tenant;
use crate::services::mfa::{MfaMethod, MfaMethodProvider};

const ALL_METHODS: [MfaMethod; 4] = [
    MfaMethod::Totp,
    MfaMethod::Sms,
    MfaMethod::Email,
    MfaMethod::Recovery,
];

#[derive(Debug, Clone)]
pub struct MfaPolicyEvaluation {
    pub is_required: bool,
    pub is_in_grace_period: bool,
    pub user_is_compliant: bool,
    pub should_block_login: bool,
    pub allowed_methods: Vec<MfaMethod>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub days_remaining_in_grace_period: Option<i64>,
    pub warning_message: Option<String>,
}

pub struct MfaPolicyEvaluator {
    mfa: Arc<dyn MfaMethodProvider>,
}

impl MfaPolicyEvaluator {
    pub fn new(mfa: Arc<dyn MfaMethodProvider>) -> Self {
        Self { mfa }
    }

    /// Methods the tenant permits. An empty policy list means no restriction.
    pub fn allowed_methods(tenant: &Tenant) -> Vec<MfaMethod> {
        if tenant.mfa_allowed_methods.is_empty() {
            return ALL_METHODS.to_vec();
        }
        tenant
            .mfa_allowed_methods
            .iter()
            .filter_map(|name| MfaMethod::parse(name))
            .collect()
    }

    pub fn is_mfa_required(tenant: &Tenant) -> bool {
        tenant.mfa_required
    }

    pub async fn evaluate_for_user(
        &self,
        tenant: &Tenant,
        user_id: Uuid,
    ) -> Result<MfaPolicyEvaluation, anyhow::Error> {
        let allowed_methods = Self::allowed_methods(tenant);

        if !tenant.mfa_required {
            return Ok(MfaPolicyEvaluation {
                is_required: false,
                is_in_grace_period: false,
                user_is_compliant: true,
                should_block_login: false,
                allowed_methods,
                grace_period_ends_at: None,
                days_remaining_in_grace_period: None,
                warning_message: None,
            });
        }

        let compliant = self.mfa.user_has_active_mfa(user_id, tenant.tenant_id).await?;
        if compliant {
            return Ok(MfaPolicyEvaluation {
                is_required: true,
                is_in_grace_period: false,
                user_is_compliant: true,
                should_block_login: false,
                allowed_methods,
                grace_period_ends_at: tenant.mfa_grace_period_ends_at,
                days_remaining_in_grace_period: None,
                warning_message: None,
            });
        }

        let now = Utc::now();
        match tenant.mfa_grace_period_ends_at {
            Some(ends_at) if ends_at > now => {
                let remaining = ends_at - now;
                // Ceiling: a partial day still counts as one.
                let days = (remaining.num_seconds() + 86_399) / 86_400;
                Ok(MfaPolicyEvaluation {
                    is_required: true,
                    is_in_grace_period: true,
                    user_is_compliant: false,
                    should_block_login: false,
                    allowed_methods,
                    grace_period_ends_at: Some(ends_at),
                    days_remaining_in_grace_period: Some(days),
                    warning_message: Some(format!(
                        "Your organization requires multi-factor authentication. \
                         You have {} day(s) left to set it up.",
                        days
                    )),
                })
            }
            other => Ok(MfaPolicyEvaluation {
                is_required: true,
                is_in_grace_period: false,
                user_is_compliant: false,
                should_block_login: true,
                allowed_methods,
                grace_period_ends_at: other,
                days_remaining_in_grace_period: None,
                warning_message: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenantState;
    use crate::services::mfa::MockMfaProvider;
    use chrono::Duration;

    fn tenant(required: bool, grace: Option<DateTime<Utc>>) -> Tenant {
        Tenant {
            tenant_id: Uuid::new_v4(),
            name: "Acme".to_string(),
            state_code: TenantState::Active.as_str().to_string(),
            mfa_required: required,
            mfa_allowed_methods: vec![],
            mfa_grace_period_ends_at: grace,
            created_at: Utc::now(),
        }
    }

    fn evaluator(enrolled: Vec<MfaMethod>) -> MfaPolicyEvaluator {
        let provider = if enrolled.is_empty() {
            MockMfaProvider::new()
        } else {
            MockMfaProvider::with_enrollment(enrolled, "000000")
        };
        MfaPolicyEvaluator::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn test_not_required_never_blocks() {
        let eval = evaluator(vec![])
            .evaluate_for_user(&tenant(false, None), Uuid::new_v4())
            .await
            .unwrap();
        assert!(!eval.is_required);
        assert!(!eval.should_block_login);
    }

    #[tokio::test]
    async fn test_required_and_compliant_passes() {
        let eval = evaluator(vec![MfaMethod::Totp])
            .evaluate_for_user(&tenant(true, None), Uuid::new_v4())
            .await
            .unwrap();
        assert!(eval.is_required);
        assert!(eval.user_is_compliant);
        assert!(!eval.should_block_login);
    }

    #[tokio::test]
    async fn test_grace_period_warns_with_ceiling_days() {
        let ends = Utc::now() + Duration::days(2) + Duration::hours(1);
        let eval = evaluator(vec![])
            .evaluate_for_user(&tenant(true, Some(ends)), Uuid::new_v4())
            .await
            .unwrap();
        assert!(eval.is_in_grace_period);
        assert!(!eval.should_block_login);
        assert_eq!(eval.days_remaining_in_grace_period, Some(3));
        assert!(eval.warning_message.unwrap().contains("3 day(s)"));
    }

    #[tokio::test]
    async fn test_elapsed_or_absent_grace_blocks() {
        let past = Utc::now() - Duration::days(1);
        for grace in [None, Some(past)] {
            let eval = evaluator(vec![])
                .evaluate_for_user(&tenant(true, grace), Uuid::new_v4())
                .await
                .unwrap();
            assert!(eval.should_block_login);
            assert!(!eval.is_in_grace_period);
        }
    }

    #[test]
    fn test_allowed_methods_empty_policy_means_all() {
        let t = tenant(true, None);
        assert_eq!(MfaPolicyEvaluator::allowed_methods(&t).len(), 4);

        let mut restricted = tenant(true, None);
        restricted.mfa_allowed_methods = vec!["totp".to_string(), "bogus".to_string()];
        assert_eq!(
            MfaPolicyEvaluator::allowed_methods(&restricted),
            vec![MfaMethod::Totp]
        );
    }
}
