use crate::{
    auth::{hash_password, is_valid_username, verify_dummy, verify_password, PasswordPolicy},
    db::{is_unique_violation, map_unique_violation},
    entities::{account, user_profile, Account, AccountModel, UserProfile, UserProfileModel},
    errors::{FieldError, ServiceError},
    events::{Event, EventSender},
    middleware_helpers::session::SessionContext,
    services::cart::SessionWrite,
    session::SessionManager,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

const FIRST_NAME_MAX: usize = 30;
const NAME_MAX: usize = 150;
const PHONE_MAX: usize = 15;
const EMAIL_MAX: usize = 254;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RegisterInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LoginInput {
    /// Username, or an email address when it contains `@`
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

/// Partial profile update; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateProfileInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar: Option<String>,
}

/// Account fields merged with the profile
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub account_id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub phone: String,
    pub address: String,
    pub avatar: Option<String>,
}

impl ProfileView {
    fn new(account: AccountModel, profile: UserProfileModel) -> Self {
        Self {
            account_id: account.id,
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            is_staff: account.is_staff,
            date_joined: account.date_joined,
            last_login: account.last_login,
            phone: profile.phone,
            address: profile.address,
            avatar: profile.avatar,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account: AccountModel,
    /// Rotated session key that now carries the login
    pub session_key: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_length(errors: &mut Vec<FieldError>, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.push(FieldError::new(
            field,
            format!("Ensure this field has no more than {} characters", max),
        ));
    }
}

/// Hashes off the async runtime; argon2 is deliberately slow.
async fn hash_blocking(password: String) -> Result<String, ServiceError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ServiceError::InternalError(e.to_string()))?
}

/// Verifies off the async workers. With no stored hash it burns one dummy verification.
async fn verify_blocking(password: &str, stored_hash: Option<String>) -> Result<bool, ServiceError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            verify_dummy(&password);
            Ok(false)
        }
    })
    .await
    .map_err(|e| ServiceError::InternalError(e.to_string()))?
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    sessions: SessionManager,
    policy: PasswordPolicy,
}

impl AccountService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        sessions: SessionManager,
    ) -> Self {
        Self {
            db,
            event_sender,
            sessions,
            policy: PasswordPolicy::default(),
        }
    }

    fn validate_registration(&self, input: &RegisterInput) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let username = input.username.trim();

        if username.is_empty() {
            errors.push(FieldError::required("username"));
        } else if !is_valid_username(username) {
            errors.push(FieldError::new(
                "username",
                "Enter a valid username of at most 150 letters, digits and @/./+/-/_ characters",
            ));
        }

        let email = normalize_email(&input.email);
        if email.is_empty() {
            errors.push(FieldError::required("email"));
        } else if !validator::validate_email(email.as_str()) {
            errors.push(FieldError::new("email", "Enter a valid email address"));
        }
        check_length(&mut errors, "email", &email, EMAIL_MAX);

        if input.password.is_empty() {
            errors.push(FieldError::required("password"));
        } else {
            for violation in self
                .policy
                .check(&input.password, username, &input.last_name)
            {
                errors.push(FieldError::new("password", violation.to_string()));
            }
        }
        if let Err(e) = PasswordPolicy::check_confirmation(&input.password, &input.password_confirm)
        {
            errors.push(FieldError::new("password_confirm", e.to_string()));
        }

        check_length(&mut errors, "first_name", input.first_name.trim(), FIRST_NAME_MAX);
        check_length(&mut errors, "last_name", input.last_name.trim(), NAME_MAX);
        errors
    }

    /// Creates the account and its profile. Every input problem is reported together.
    #[instrument(skip(self, input), fields(username = %input.username))]
    pub async fn register(&self, input: RegisterInput) -> Result<AccountModel, ServiceError> {
        let errors = self.validate_registration(&input);
        if !errors.is_empty() {
            return Err(ServiceError::InvalidFields(errors));
        }

        let username = input.username.trim().to_string();
        let email = normalize_email(&input.email);

        if Account::find()
            .filter(account::Column::Username.eq(username.as_str()))
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "A user with that username already exists".into(),
            ));
        }
        if self.email_taken(&email, None).await? {
            return Err(ServiceError::DuplicateEmail);
        }

        let password_hash = hash_blocking(input.password).await?;
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let account = account::ActiveModel {
            username: Set(username),
            email: Set(email),
            first_name: Set(input.first_name.trim().to_string()),
            last_name: Set(input.last_name.trim().to_string()),
            password_hash: Set(password_hash),
            is_staff: Set(false),
            is_active: Set(true),
            date_joined: Set(now),
            last_login: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            map_unique_violation(e, || {
                ServiceError::Conflict("Username or email is already registered".into())
            })
        })?;
        get_or_create_profile(&txn, account.id).await?;
        txn.commit().await?;

        counter!("storefront.accounts.registered", 1);
        info!(account_id = account.id, "Account registered");
        self.event_sender
            .send_or_log(Event::AccountRegistered {
                account_id: account.id,
                username: account.username.clone(),
            })
            .await;
        Ok(account)
    }

    async fn email_taken(&self, email: &str, except: Option<i32>) -> Result<bool, ServiceError> {
        let mut query = Account::find().filter(account::Column::Email.eq(email));
        if let Some(id) = except {
            query = query.filter(account::Column::Id.ne(id));
        }
        Ok(query.one(&*self.db).await?.is_some())
    }

    /// Checks credentials and returns the account. Every failure looks the same to the caller.
    #[instrument(skip(self, identifier, password))]
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<AccountModel, ServiceError> {
        let identifier = identifier.trim();
        let query = if identifier.contains('@') {
            Account::find().filter(account::Column::Email.eq(normalize_email(identifier)))
        } else {
            Account::find().filter(account::Column::Username.eq(identifier))
        };

        let Some(account) = query.one(&*self.db).await? else {
            verify_blocking(password, None).await?;
            counter!("storefront.logins", 1, "outcome" => "failed");
            return Err(ServiceError::InvalidCredentials);
        };

        let verified = verify_blocking(password, Some(account.password_hash.clone())).await?;
        if !verified || !account.is_active {
            counter!("storefront.logins", 1, "outcome" => "failed");
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(account)
    }

    /// Authenticates, binds the account to a freshly rotated session key and keeps the cart.
    #[instrument(skip(self, session, input), fields(remember = input.remember))]
    pub async fn login(
        &self,
        session: &SessionContext,
        input: &LoginInput,
    ) -> Result<SessionWrite<LoginOutcome>, ServiceError> {
        let account = self.authenticate(&input.identifier, &input.password).await?;

        let _guard = self.sessions.lock(&session.key).await;
        let mut data = self.sessions.load(&session.key).await?;
        data.account_id = Some(account.id);
        data.expire_at_browser_close = !input.remember;
        let session_key = self.sessions.cycle_key(&session.key, &data).await?;

        let now = Utc::now();
        let mut active: account::ActiveModel = account.into();
        active.last_login = Set(Some(now));
        let account = active.update(&*self.db).await?;

        counter!("storefront.logins", 1, "outcome" => "success");
        info!(account_id = account.id, "Account logged in");
        self.event_sender
            .send_or_log(Event::AccountLoggedIn {
                account_id: account.id,
                at: now,
            })
            .await;

        Ok(SessionWrite {
            value: LoginOutcome {
                account,
                session_key,
            },
            expire_at_browser_close: data.expire_at_browser_close,
        })
    }

    /// Drops the whole session, cart included.
    #[instrument(skip(self, session))]
    pub async fn logout(&self, session: &SessionContext) -> Result<(), ServiceError> {
        if session.is_new {
            return Ok(());
        }
        let _guard = self.sessions.lock(&session.key).await;
        self.sessions.flush(&session.key).await
    }

    #[instrument(skip(self, account), fields(account_id = account.id))]
    pub async fn profile(&self, account: AccountModel) -> Result<ProfileView, ServiceError> {
        let profile = get_or_create_profile(&*self.db, account.id).await?;
        Ok(ProfileView::new(account, profile))
    }

    #[instrument(skip(self, account, input), fields(account_id = account.id))]
    pub async fn update_profile(
        &self,
        account: AccountModel,
        input: UpdateProfileInput,
    ) -> Result<ProfileView, ServiceError> {
        let mut errors = Vec::new();
        let email = input.email.as_deref().map(normalize_email);
        if let Some(email) = &email {
            if email.is_empty() {
                errors.push(FieldError::required("email"));
            } else if !validator::validate_email(email.as_str()) {
                errors.push(FieldError::new("email", "Enter a valid email address"));
            }
            check_length(&mut errors, "email", email, EMAIL_MAX);
        }
        if let Some(v) = &input.first_name {
            check_length(&mut errors, "first_name", v.trim(), FIRST_NAME_MAX);
        }
        if let Some(v) = &input.last_name {
            check_length(&mut errors, "last_name", v.trim(), NAME_MAX);
        }
        if let Some(v) = &input.phone {
            check_length(&mut errors, "phone", v.trim(), PHONE_MAX);
        }
        if !errors.is_empty() {
            return Err(ServiceError::InvalidFields(errors));
        }

        if let Some(email) = &email {
            if self.email_taken(email, Some(account.id)).await? {
                return Err(ServiceError::DuplicateEmail);
            }
        }

        let txn = self.db.begin().await?;
        let profile = get_or_create_profile(&txn, account.id).await?;

        let mut account_update: account::ActiveModel = account.into();
        if let Some(email) = email {
            account_update.email = Set(email);
        }
        if let Some(v) = input.first_name {
            account_update.first_name = Set(v.trim().to_string());
        }
        if let Some(v) = input.last_name {
            account_update.last_name = Set(v.trim().to_string());
        }
        let account = account_update.update(&txn).await.map_err(|e| {
            map_unique_violation(e, || ServiceError::DuplicateEmail)
        })?;

        let mut profile_update: user_profile::ActiveModel = profile.into();
        if let Some(v) = input.phone {
            profile_update.phone = Set(v.trim().to_string());
        }
        if let Some(v) = input.address {
            profile_update.address = Set(v.trim().to_string());
        }
        if let Some(v) = input.avatar {
            let v = v.trim().to_string();
            profile_update.avatar = Set(if v.is_empty() { None } else { Some(v) });
        }
        profile_update.updated_at = Set(Utc::now());
        let profile = profile_update.update(&txn).await?;
        txn.commit().await?;

        info!(account_id = account.id, "Profile updated");
        Ok(ProfileView::new(account, profile))
    }
}

/// Returns the account's profile, inserting an empty one on first access.
async fn get_or_create_profile<C: ConnectionTrait>(
    conn: &C,
    account_id: i32,
) -> Result<UserProfileModel, ServiceError> {
    let existing = UserProfile::find()
        .filter(user_profile::Column::AccountId.eq(account_id))
        .one(conn)
        .await?;
    if let Some(profile) = existing {
        return Ok(profile);
    }

    let now = Utc::now();
    let inserted = user_profile::ActiveModel {
        account_id: Set(account_id),
        phone: Set(String::new()),
        address: Set(String::new()),
        avatar: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await;

    match inserted {
        Ok(profile) => Ok(profile),
        Err(e) if is_unique_violation(&e) => {
            warn!(account_id, "Profile created concurrently; reloading");
            UserProfile::find()
                .filter(user_profile::Column::AccountId.eq(account_id))
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::InternalError("profile missing after insert".into()))
        }
        Err(e) => Err(e.into()),
    }
}
