use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use uuid::Uuid;

use crate::models::{AccountRow, SessionRow, TeamRow, TokenPurpose, UserRow, VerificationTokenRow};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // Set up rustls TLS configuration
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

/// Build the connection pool. Connections are opened lazily on first use.
pub fn establish_connection_pool(database_url: &str, tls: bool) -> anyhow::Result<DbPool> {
    let config = if tls {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup =
            Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            database_url,
            manager_config,
        )
    } else {
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url)
    };

    let pool = Pool::builder(config).max_size(16).build()?;

    Ok(pool)
}

/// Escape `%`, `_` and `\` so user input matches literally inside LIKE/ILIKE.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// User database operations
pub mod users {
    use super::*;
    use crate::models::UserSortField;
    use shared_types::{Role, SearchField, SortDirection};

    pub struct NewUser<'a> {
        pub name: &'a str,
        pub email: &'a str,
        pub email_verified: bool,
        pub image: Option<&'a str>,
        pub role: Role,
    }

    #[derive(AsChangeset)]
    #[diesel(table_name = crate::schema::users)]
    pub struct UserChanges<'a> {
        pub name: Option<&'a str>,
        pub email: Option<&'a str>,
        pub points: Option<i32>,
        pub updated_at: DateTime<Utc>,
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> QueryResult<Option<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(id.eq(user_id))
            .select(UserRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Load a user and hold a row lock until the surrounding transaction ends.
    pub async fn lock_by_id(conn: &mut AsyncPgConnection, user_id: Uuid) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        users
            .filter(id.eq(user_id))
            .select(UserRow::as_select())
            .for_update()
            .first(conn)
            .await
    }

    pub async fn find_by_email(
        conn: &mut AsyncPgConnection,
        email_addr: &str,
    ) -> QueryResult<Option<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(email.eq(email_addr.to_lowercase()))
            .select(UserRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn create(conn: &mut AsyncPgConnection, new_user: NewUser<'_>) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::insert_into(users)
            .values((
                name.eq(new_user.name),
                email.eq(new_user.email.to_lowercase()),
                email_verified.eq(new_user.email_verified),
                image.eq(new_user.image),
                role.eq(new_user.role.as_str()),
            ))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn delete(conn: &mut AsyncPgConnection, user_id: Uuid) -> QueryResult<usize> {
        use crate::schema::users::dsl::*;

        diesel::delete(users.filter(id.eq(user_id)))
            .execute(conn)
            .await
    }

    pub async fn mark_email_verified(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((email_verified.eq(true), updated_at.eq(Utc::now())))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn update(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        changes: UserChanges<'_>,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set(&changes)
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn set_role(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        new_role: Role,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((role.eq(new_role.as_str()), updated_at.eq(Utc::now())))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn set_points(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        value: i32,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((points.eq(value), updated_at.eq(Utc::now())))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn ban(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        reason: Option<&str>,
        expires: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((
                banned.eq(true),
                ban_reason.eq(reason),
                ban_expires.eq(expires),
                banned_at.eq(Some(now)),
                updated_at.eq(now),
            ))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn unban(conn: &mut AsyncPgConnection, user_id: Uuid) -> QueryResult<UserRow> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((
                banned.eq(false),
                ban_reason.eq(None::<String>),
                ban_expires.eq(None::<DateTime<Utc>>),
                banned_at.eq(None::<DateTime<Utc>>),
                updated_at.eq(Utc::now()),
            ))
            .returning(UserRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn assign_team(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        team: Uuid,
        now: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((
                team_id.eq(Some(team)),
                team_joined_at.eq(Some(now)),
                updated_at.eq(now),
            ))
            .execute(conn)
            .await
    }

    pub async fn clear_team(conn: &mut AsyncPgConnection, user_id: Uuid) -> QueryResult<usize> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set((
                team_id.eq(None::<Uuid>),
                team_joined_at.eq(None::<DateTime<Utc>>),
                updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await
    }

    /// Detach every member of a team; returns how many users were updated.
    pub async fn clear_team_for_all(
        conn: &mut AsyncPgConnection,
        team: Uuid,
    ) -> QueryResult<usize> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(team_id.eq(team)))
            .set((
                team_id.eq(None::<Uuid>),
                team_joined_at.eq(None::<DateTime<Utc>>),
                updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await
    }

    /// Members of the given teams, in join order.
    pub async fn list_members(
        conn: &mut AsyncPgConnection,
        team_ids: &[Uuid],
    ) -> QueryResult<Vec<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(team_id.eq_any(team_ids))
            .order_by((team_joined_at.asc(), created_at.asc()))
            .select(UserRow::as_select())
            .load(conn)
            .await
    }

    pub async fn list_by_ids(
        conn: &mut AsyncPgConnection,
        user_ids: &[Uuid],
    ) -> QueryResult<Vec<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(id.eq_any(user_ids))
            .select(UserRow::as_select())
            .load(conn)
            .await
    }

    /// Paginated admin search. Returns each user with their team name and the
    /// total number of matches ignoring pagination.
    pub async fn search(
        conn: &mut AsyncPgConnection,
        search: Option<(SearchField, &str)>,
        sort_field: UserSortField,
        direction: SortDirection,
        limit: i64,
        offset: i64,
    ) -> QueryResult<(Vec<(UserRow, Option<String>)>, i64)> {
        use crate::schema::{teams, users};

        let mut query = users::table
            .left_join(teams::table)
            .select((UserRow::as_select(), teams::name.nullable()))
            .into_boxed();
        let mut count_query = users::table.count().into_boxed();

        if let Some((field, value)) = search {
            let pattern = format!("%{}%", escape_like(value));
            match field {
                SearchField::Email => {
                    query = query.filter(users::email.ilike(pattern.clone()));
                    count_query = count_query.filter(users::email.ilike(pattern));
                }
                SearchField::Name => {
                    query = query.filter(users::name.ilike(pattern.clone()));
                    count_query = count_query.filter(users::name.ilike(pattern));
                }
            }
        }

        query = match (sort_field, direction) {
            (UserSortField::CreatedAt, SortDirection::Asc) => query.order_by(users::created_at.asc()),
            (UserSortField::CreatedAt, SortDirection::Desc) => query.order_by(users::created_at.desc()),
            (UserSortField::Name, SortDirection::Asc) => query.order_by(users::name.asc()),
            (UserSortField::Name, SortDirection::Desc) => query.order_by(users::name.desc()),
            (UserSortField::Email, SortDirection::Asc) => query.order_by(users::email.asc()),
            (UserSortField::Email, SortDirection::Desc) => query.order_by(users::email.desc()),
            (UserSortField::Points, SortDirection::Asc) => query.order_by(users::points.asc()),
            (UserSortField::Points, SortDirection::Desc) => query.order_by(users::points.desc()),
        };

        let rows = query
            .then_order_by(users::id.asc())
            .limit(limit)
            .offset(offset)
            .load::<(UserRow, Option<String>)>(conn)
            .await?;
        let total = count_query.get_result::<i64>(conn).await?;

        Ok((rows, total))
    }

    /// Highest-scoring non-admin users.
    pub async fn top_by_points(
        conn: &mut AsyncPgConnection,
        max_entries: i64,
    ) -> QueryResult<Vec<UserRow>> {
        use crate::schema::users::dsl::*;

        users
            .filter(role.ne(Role::Admin.as_str()))
            .order_by((points.desc(), name.asc()))
            .limit(max_entries)
            .select(UserRow::as_select())
            .load(conn)
            .await
    }
}

// Team database operations
pub mod teams {
    use super::*;

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        team_id: Uuid,
    ) -> QueryResult<Option<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .filter(id.eq(team_id))
            .select(TeamRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn lock_by_id(
        conn: &mut AsyncPgConnection,
        team_id: Uuid,
    ) -> QueryResult<Option<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .filter(id.eq(team_id))
            .select(TeamRow::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()
    }

    pub async fn lock_by_join_code(
        conn: &mut AsyncPgConnection,
        code: &str,
    ) -> QueryResult<Option<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .filter(join_code.eq(code))
            .select(TeamRow::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()
    }

    pub async fn find_by_lead(
        conn: &mut AsyncPgConnection,
        lead_id: Uuid,
    ) -> QueryResult<Option<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .filter(teamlead_id.eq(lead_id))
            .select(TeamRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn lock_by_lead(
        conn: &mut AsyncPgConnection,
        lead_id: Uuid,
    ) -> QueryResult<Option<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .filter(teamlead_id.eq(lead_id))
            .select(TeamRow::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()
    }

    /// Case-insensitive name lookup.
    pub async fn name_taken(conn: &mut AsyncPgConnection, team_name: &str) -> QueryResult<bool> {
        use crate::schema::teams::dsl::*;

        let existing = teams
            .filter(name.ilike(escape_like(team_name)))
            .select(id)
            .first::<Uuid>(conn)
            .await
            .optional()?;

        Ok(existing.is_some())
    }

    pub async fn join_code_taken(conn: &mut AsyncPgConnection, code: &str) -> QueryResult<bool> {
        use crate::schema::teams::dsl::*;

        let existing = teams
            .filter(join_code.eq(code))
            .select(id)
            .first::<Uuid>(conn)
            .await
            .optional()?;

        Ok(existing.is_some())
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        team_name: &str,
        lead_id: Uuid,
        code: &str,
    ) -> QueryResult<TeamRow> {
        use crate::schema::teams::dsl::*;

        diesel::insert_into(teams)
            .values((
                name.eq(team_name),
                teamlead_id.eq(lead_id),
                join_code.eq(code),
                points.eq(0),
                is_verified.eq(false),
            ))
            .returning(TeamRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn touch(conn: &mut AsyncPgConnection, team_id: Uuid) -> QueryResult<usize> {
        use crate::schema::teams::dsl::*;

        diesel::update(teams.filter(id.eq(team_id)))
            .set(updated_at.eq(Utc::now()))
            .execute(conn)
            .await
    }

    pub async fn delete(conn: &mut AsyncPgConnection, team_id: Uuid) -> QueryResult<usize> {
        use crate::schema::teams::dsl::*;

        diesel::delete(teams.filter(id.eq(team_id)))
            .execute(conn)
            .await
    }

    /// Returns the number of matched rows (0 when the team does not exist).
    pub async fn set_verified(
        conn: &mut AsyncPgConnection,
        team_id: Uuid,
        verified: bool,
    ) -> QueryResult<usize> {
        use crate::schema::teams::dsl::*;

        diesel::update(teams.filter(id.eq(team_id)))
            .set((is_verified.eq(verified), updated_at.eq(Utc::now())))
            .execute(conn)
            .await
    }

    pub async fn set_points(
        conn: &mut AsyncPgConnection,
        team_id: Uuid,
        value: i32,
    ) -> QueryResult<TeamRow> {
        use crate::schema::teams::dsl::*;

        diesel::update(teams.filter(id.eq(team_id)))
            .set((points.eq(value), updated_at.eq(Utc::now())))
            .returning(TeamRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn list_all(conn: &mut AsyncPgConnection) -> QueryResult<Vec<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .order_by(created_at.desc())
            .select(TeamRow::as_select())
            .load(conn)
            .await
    }

    pub async fn list_verified_by_points(
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Vec<TeamRow>> {
        use crate::schema::teams::dsl::*;

        teams
            .filter(is_verified.eq(true))
            .order_by((points.desc(), name.asc()))
            .select(TeamRow::as_select())
            .load(conn)
            .await
    }
}

// Session database operations
pub mod sessions {
    use super::*;
    use shared_types::SessionResponse;

    pub struct NewSession<'a> {
        pub user_id: Uuid,
        pub token: &'a str,
        pub expires_at: DateTime<Utc>,
        pub ip_address: Option<&'a str>,
        pub user_agent: Option<&'a str>,
        pub impersonated_by: Option<Uuid>,
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_session: NewSession<'_>,
    ) -> QueryResult<SessionRow> {
        use crate::schema::sessions::dsl::*;

        diesel::insert_into(sessions)
            .values((
                user_id.eq(new_session.user_id),
                token.eq(new_session.token),
                expires_at.eq(new_session.expires_at),
                ip_address.eq(new_session.ip_address),
                user_agent.eq(new_session.user_agent),
                impersonated_by.eq(new_session.impersonated_by),
            ))
            .returning(SessionRow::as_returning())
            .get_result(conn)
            .await
    }

    /// Unexpired session by token.
    pub async fn find_active(
        conn: &mut AsyncPgConnection,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> QueryResult<Option<SessionRow>> {
        use crate::schema::sessions::dsl::*;

        sessions
            .filter(token.eq(session_token))
            .filter(expires_at.gt(now))
            .select(SessionRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> QueryResult<Vec<SessionResponse>> {
        use crate::schema::sessions::dsl::*;

        sessions
            .filter(user_id.eq(owner))
            .filter(expires_at.gt(now))
            .order_by(created_at.desc())
            .select((
                id,
                user_id,
                expires_at,
                ip_address,
                user_agent,
                impersonated_by,
                created_at,
                updated_at,
            ))
            .load::<SessionResponse>(conn)
            .await
    }

    pub async fn extend(
        conn: &mut AsyncPgConnection,
        session_id: Uuid,
        new_expiry: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::sessions::dsl::*;

        diesel::update(sessions.filter(id.eq(session_id)))
            .set((expires_at.eq(new_expiry), updated_at.eq(Utc::now())))
            .execute(conn)
            .await
    }

    pub async fn delete_for_user(
        conn: &mut AsyncPgConnection,
        session_id: Uuid,
        owner: Uuid,
    ) -> QueryResult<usize> {
        use crate::schema::sessions::dsl::*;

        diesel::delete(sessions.filter(id.eq(session_id)).filter(user_id.eq(owner)))
            .execute(conn)
            .await
    }

    pub async fn delete_by_token(
        conn: &mut AsyncPgConnection,
        session_token: &str,
    ) -> QueryResult<usize> {
        use crate::schema::sessions::dsl::*;

        diesel::delete(sessions.filter(token.eq(session_token)))
            .execute(conn)
            .await
    }

    pub async fn delete_all_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> QueryResult<usize> {
        use crate::schema::sessions::dsl::*;

        diesel::delete(sessions.filter(user_id.eq(owner)))
            .execute(conn)
            .await
    }

    pub async fn delete_expired(
        conn: &mut AsyncPgConnection,
        now: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::sessions::dsl::*;

        diesel::delete(sessions.filter(expires_at.le(now)))
            .execute(conn)
            .await
    }
}

// Login account database operations
pub mod accounts {
    use super::*;

    pub const CREDENTIAL_PROVIDER: &str = "credential";

    pub async fn find_by_provider(
        conn: &mut AsyncPgConnection,
        provider: &str,
        provider_account_id: &str,
    ) -> QueryResult<Option<AccountRow>> {
        use crate::schema::accounts::dsl::*;

        accounts
            .filter(provider_id.eq(provider))
            .filter(account_id.eq(provider_account_id))
            .select(AccountRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn find_credential(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> QueryResult<Option<AccountRow>> {
        use crate::schema::accounts::dsl::*;

        accounts
            .filter(user_id.eq(owner))
            .filter(provider_id.eq(CREDENTIAL_PROVIDER))
            .select(AccountRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn delete_credential(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> QueryResult<usize> {
        use crate::schema::accounts::dsl::*;

        diesel::delete(
            accounts
                .filter(user_id.eq(owner))
                .filter(provider_id.eq(CREDENTIAL_PROVIDER)),
        )
        .execute(conn)
        .await
    }

    pub async fn create_credential(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        hash: &str,
    ) -> QueryResult<AccountRow> {
        use crate::schema::accounts::dsl::*;

        diesel::insert_into(accounts)
            .values((
                user_id.eq(owner),
                provider_id.eq(CREDENTIAL_PROVIDER),
                account_id.eq(owner.to_string()),
                password_hash.eq(Some(hash)),
            ))
            .returning(AccountRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn create_oauth(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        provider: &str,
        provider_account_id: &str,
        token: &str,
    ) -> QueryResult<AccountRow> {
        use crate::schema::accounts::dsl::*;

        diesel::insert_into(accounts)
            .values((
                user_id.eq(owner),
                provider_id.eq(provider),
                account_id.eq(provider_account_id),
                access_token.eq(Some(token)),
            ))
            .returning(AccountRow::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn update_password(
        conn: &mut AsyncPgConnection,
        row_id: Uuid,
        hash: &str,
    ) -> QueryResult<usize> {
        use crate::schema::accounts::dsl::*;

        diesel::update(accounts.filter(id.eq(row_id)))
            .set((password_hash.eq(Some(hash)), updated_at.eq(Utc::now())))
            .execute(conn)
            .await
    }

    pub async fn update_access_token(
        conn: &mut AsyncPgConnection,
        row_id: Uuid,
        token: &str,
    ) -> QueryResult<usize> {
        use crate::schema::accounts::dsl::*;

        diesel::update(accounts.filter(id.eq(row_id)))
            .set((access_token.eq(Some(token)), updated_at.eq(Utc::now())))
            .execute(conn)
            .await
    }
}

// Single-use token operations (email verification, password reset, OAuth state)
pub mod tokens {
    use super::*;

    pub async fn create(
        conn: &mut AsyncPgConnection,
        kind: TokenPurpose,
        value: &str,
        owner: Option<Uuid>,
        expiry: DateTime<Utc>,
    ) -> QueryResult<VerificationTokenRow> {
        use crate::schema::verification_tokens::dsl::*;

        diesel::insert_into(verification_tokens)
            .values((
                purpose.eq(kind.as_str()),
                token.eq(value),
                user_id.eq(owner),
                expires_at.eq(expiry),
            ))
            .returning(VerificationTokenRow::as_returning())
            .get_result(conn)
            .await
    }

    /// Delete and return an unexpired token in one statement, so it can be redeemed once.
    pub async fn consume(
        conn: &mut AsyncPgConnection,
        kind: TokenPurpose,
        value: &str,
        now: DateTime<Utc>,
    ) -> QueryResult<Option<VerificationTokenRow>> {
        use crate::schema::verification_tokens::dsl::*;

        diesel::delete(
            verification_tokens
                .filter(purpose.eq(kind.as_str()))
                .filter(token.eq(value))
                .filter(expires_at.gt(now)),
        )
        .returning(VerificationTokenRow::as_returning())
        .get_result(conn)
        .await
        .optional()
    }

    pub async fn delete_for_user(
        conn: &mut AsyncPgConnection,
        kind: TokenPurpose,
        owner: Uuid,
    ) -> QueryResult<usize> {
        use crate::schema::verification_tokens::dsl::*;

        diesel::delete(
            verification_tokens
                .filter(purpose.eq(kind.as_str()))
                .filter(user_id.eq(owner)),
        )
        .execute(conn)
        .await
    }

    pub async fn delete_expired(
        conn: &mut AsyncPgConnection,
        now: DateTime<Utc>,
    ) -> QueryResult<usize> {
        use crate::schema::verification_tokens::dsl::*;

        diesel::delete(verification_tokens.filter(expires_at.le(now)))
            .execute(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_escapes_wildcards() {
        assert_eq!(escape_like("100%_fun\\"), "100\\%\\_fun\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn test_pool_builds_without_connecting() {
        let pool = establish_connection_pool("postgres://nobody@127.0.0.1:1/none", false)
            .expect("pool should build lazily");
        assert_eq!(pool.status().size, 0);
    }
}
