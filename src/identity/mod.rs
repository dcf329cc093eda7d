// Accounts, credentials and the follow graph.
use serde::{Deserialize, Serialize};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::{Claims, CredentialCodec, SessionContext};
use crate::db::models::{non_empty, NewUser, Profile, User, UserChanges};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::store::{DynStore, SocialGraph, UserRepository};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Fields a user may change about themselves. Empty strings are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

/// A stored user plus a freshly issued credential.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}

pub struct IdentityService {
    store: DynStore,
    codec: CredentialCodec,
    password_secret: String,
}

impl IdentityService {
    pub fn new(store: DynStore, codec: CredentialCodec, password_secret: impl Into<String>) -> Self {
        Self {
            store,
            codec,
            password_secret: password_secret.into(),
        }
    }

    pub async fn register(
        &self,
        cx: &SessionContext,
        input: Registration,
    ) -> AppResult<AuthenticatedUser> {
        let mut errors = FieldErrors::default();
        if input.username.trim().is_empty() {
            errors.add("username", "can't be blank");
        }
        if input.email.trim().is_empty() {
            errors.add("email", "can't be blank");
        }
        if input.password.is_empty() {
            errors.add("password", "can't be blank");
        }
        errors.into_result()?;

        let user = self
            .store
            .insert_user(
                cx.deadline(),
                &NewUser {
                    password_hash: hash_password(&input.password, &self.password_secret),
                    username: input.username,
                    email: input.email,
                },
            )
            .await?;

        tracing::info!(user_id = user.id, username = %user.username, "Registered user");
        self.with_token(user)
    }

    /// Unknown email and wrong password fail identically.
    pub async fn login(
        &self,
        cx: &SessionContext,
        input: LoginRequest,
    ) -> AppResult<AuthenticatedUser> {
        let mut errors = FieldErrors::default();
        if input.email.is_empty() {
            errors.add("email", "can't be blank");
        }
        if input.password.is_empty() {
            errors.add("password", "can't be blank");
        }
        errors.into_result()?;

        let user = self
            .store
            .user_by_email(cx.deadline(), &input.email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(&input.password, &self.password_secret, &user.password_hash) {
            tracing::debug!(user_id = user.id, "Password mismatch on login");
            return Err(AppError::InvalidCredentials);
        }

        self.with_token(user)
    }

    pub async fn current_user(&self, cx: &SessionContext) -> AppResult<AuthenticatedUser> {
        let identity = cx.require_identity()?;
        let user = self
            .store
            .user_by_id(cx.deadline(), identity.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".into()))?;
        self.with_token(user)
    }

    pub async fn update_user(
        &self,
        cx: &SessionContext,
        input: UserUpdate,
    ) -> AppResult<AuthenticatedUser> {
        let identity = cx.require_identity()?;
        let changes = UserChanges {
            username: non_empty(input.username),
            email: non_empty(input.email),
            password_hash: non_empty(input.password)
                .map(|raw| hash_password(&raw, &self.password_secret)),
            image: non_empty(input.image),
            bio: non_empty(input.bio),
        };

        let user = self
            .store
            .update_user(cx.deadline(), identity.user_id, &changes)
            .await?;
        self.with_token(user)
    }

    /// Anonymous viewers always see `following = false`.
    pub async fn profile(&self, cx: &SessionContext, username: &str) -> AppResult<Profile> {
        let target = self.find_by_username(cx, username).await?;
        let following = match cx.viewer_id() {
            Some(viewer) => {
                self.store
                    .is_following(cx.deadline(), viewer, target.id)
                    .await?
            }
            None => false,
        };
        Ok(Profile::of(&target, following))
    }

    pub async fn follow(&self, cx: &SessionContext, username: &str) -> AppResult<Profile> {
        let identity = cx.require_identity()?;
        let target = self.find_by_username(cx, username).await?;

        self.store
            .follow(cx.deadline(), identity.user_id, target.id)
            .await?;
        Ok(Profile::of(&target, true))
    }

    pub async fn unfollow(&self, cx: &SessionContext, username: &str) -> AppResult<Profile> {
        let identity = cx.require_identity()?;
        let target = self.find_by_username(cx, username).await?;

        self.store
            .unfollow(cx.deadline(), identity.user_id, target.id)
            .await?;
        Ok(Profile::of(&target, false))
    }

    async fn find_by_username(&self, cx: &SessionContext, username: &str) -> AppResult<User> {
        self.store
            .user_by_username(cx.deadline(), username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("profile {} not found", username)))
    }

    fn with_token(&self, user: User) -> AppResult<AuthenticatedUser> {
        let token = self.codec.issue(&Claims {
            subject_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        })?;
        Ok(AuthenticatedUser { user, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::auth::Identity;
    use crate::store::sqlite::test_store;

    const PEPPER: &str = "pepper";

    fn service() -> (IdentityService, CredentialCodec, tempfile::TempDir) {
        let (store, tmp) = test_store();
        let codec = CredentialCodec::new("jwt-secret");
        let service = IdentityService::new(Arc::new(store), codec.clone(), PEPPER);
        (service, codec, tmp)
    }

    fn register_input(name: &str) -> Registration {
        Registration {
            username: name.into(),
            email: format!("{}@x.com", name),
            password: "p1".into(),
        }
    }

    fn session_for(auth: &AuthenticatedUser) -> SessionContext {
        SessionContext::authenticated(Identity {
            user_id: auth.user.id,
            username: auth.user.username.clone(),
            email: auth.user.email.clone(),
        })
    }

    #[tokio::test]
    async fn register_then_login() {
        let (svc, codec, _tmp) = service();
        let anon = SessionContext::anonymous();

        let ann = svc.register(&anon, register_input("ann")).await.unwrap();
        assert_ne!(ann.user.password_hash, "p1");
        assert_eq!(codec.verify(&ann.token).unwrap().subject_id, ann.user.id);

        let login = svc
            .login(
                &anon,
                LoginRequest {
                    email: "ann@x.com".into(),
                    password: "p1".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(login.user.username, "ann");
        assert!(!login.token.is_empty());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_invalid_credentials() {
        let (svc, _codec, _tmp) = service();
        let anon = SessionContext::anonymous();
        svc.register(&anon, register_input("ann")).await.unwrap();

        let wrong = svc
            .login(
                &anon,
                LoginRequest {
                    email: "ann@x.com".into(),
                    password: "wrong".into(),
                },
            )
            .await;
        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));

        let unknown = svc
            .login(
                &anon,
                LoginRequest {
                    email: "nobody@x.com".into(),
                    password: "p1".into(),
                },
            )
            .await;
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn empty_login_fields_are_validation_errors() {
        let (svc, _codec, _tmp) = service();
        let err = svc
            .login(&SessionContext::anonymous(), LoginRequest::default())
            .await
            .unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert!(errors.get("email").is_some());
                assert!(errors.get("password").is_some());
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let (svc, _codec, _tmp) = service();
        let anon = SessionContext::anonymous();
        svc.register(&anon, register_input("ann")).await.unwrap();

        let mut again = register_input("ann");
        again.email = "other@x.com".into();
        match svc.register(&anon, again).await {
            Err(AppError::Conflict { field, .. }) => assert_eq!(field, "username"),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_with_only_bio_keeps_the_rest() {
        let (svc, codec, _tmp) = service();
        let ann = svc
            .register(&SessionContext::anonymous(), register_input("ann"))
            .await
            .unwrap();
        let cx = session_for(&ann);

        let updated = svc
            .update_user(
                &cx,
                UserUpdate {
                    bio: Some("hello".into()),
                    username: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.user.bio, "hello");
        assert_eq!(updated.user.username, "ann");
        assert_eq!(updated.user.email, "ann@x.com");
        assert_eq!(updated.user.image, "");
        assert_eq!(updated.user.password_hash, ann.user.password_hash);
        assert_eq!(codec.verify(&updated.token).unwrap().username, "ann");
    }

    #[tokio::test]
    async fn update_password_rehashes() {
        let (svc, _codec, _tmp) = service();
        let anon = SessionContext::anonymous();
        let ann = svc.register(&anon, register_input("ann")).await.unwrap();

        svc.update_user(
            &session_for(&ann),
            UserUpdate {
                password: Some("p2".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let login = svc
            .login(
                &anon,
                LoginRequest {
                    email: "ann@x.com".into(),
                    password: "p2".into(),
                },
            )
            .await;
        assert!(login.is_ok());
    }

    #[tokio::test]
    async fn update_requires_a_session() {
        let (svc, _codec, _tmp) = service();
        let result = svc
            .update_user(&SessionContext::anonymous(), UserUpdate::default())
            .await;
        assert!(matches!(result, Err(AppError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn stale_identity_is_not_found_on_read_and_update() {
        let (svc, _codec, _tmp) = service();
        let ghost = SessionContext::authenticated(Identity {
            user_id: 999,
            username: "ghost".into(),
            email: "ghost@x.com".into(),
        });

        assert!(matches!(
            svc.current_user(&ghost).await,
            Err(AppError::NotFound(_))
        ));
        let update = svc
            .update_user(
                &ghost,
                UserUpdate {
                    bio: Some("boo".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(update, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn follow_is_idempotent_and_visible_in_profile() {
        let (svc, _codec, _tmp) = service();
        let anon = SessionContext::anonymous();
        svc.register(&anon, register_input("ann")).await.unwrap();
        let bob = svc.register(&anon, register_input("bob")).await.unwrap();
        let as_bob = session_for(&bob);

        assert!(svc.follow(&as_bob, "ann").await.unwrap().following);
        assert!(svc.follow(&as_bob, "ann").await.unwrap().following);
        assert!(svc.profile(&as_bob, "ann").await.unwrap().following);
        assert!(!svc.profile(&anon, "ann").await.unwrap().following);

        assert!(!svc.unfollow(&as_bob, "ann").await.unwrap().following);
        assert!(!svc.unfollow(&as_bob, "ann").await.unwrap().following);
        assert!(!svc.profile(&as_bob, "ann").await.unwrap().following);
    }

    #[tokio::test]
    async fn follow_unknown_user_is_not_found() {
        let (svc, _codec, _tmp) = service();
        let bob = svc
            .register(&SessionContext::anonymous(), register_input("bob"))
            .await
            .unwrap();
        let result = svc.follow(&session_for(&bob), "ghost").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn self_follow_is_allowed() {
        let (svc, _codec, _tmp) = service();
        let ann = svc
            .register(&SessionContext::anonymous(), register_input("ann"))
            .await
            .unwrap();
        let as_ann = session_for(&ann);

        assert!(svc.follow(&as_ann, "ann").await.unwrap().following);
        assert!(svc.profile(&as_ann, "ann").await.unwrap().following);
    }

    #[tokio::test]
    async fn current_user_reissues_token() {
        let (svc, codec, _tmp) = service();
        let ann = svc
            .register(&SessionContext::anonymous(), register_input("ann"))
            .await
            .unwrap();

        let me = svc.current_user(&session_for(&ann)).await.unwrap();
        assert_eq!(me.user, ann.user);
        assert_eq!(codec.verify(&me.token).unwrap().email, "ann@x.com");
    }

    #[test]
    fn authenticated_user_serializes_flat_without_secrets() {
        let json = serde_json::to_value(AuthenticatedUser {
            user: User {
                id: 1,
                username: "ann".into(),
                email: "a@x.com".into(),
                password_hash: "secret".into(),
                image: String::new(),
                bio: String::new(),
            },
            token: "t".into(),
        })
        .unwrap();
        assert_eq!(json["username"], "ann");
        assert_eq!(json["token"], "t");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("id").is_none());
    }
}
