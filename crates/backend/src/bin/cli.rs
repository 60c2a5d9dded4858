use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared_types::{
    AdjustPointsRequest, AdminUserResponse, BanUserRequest, LeaderboardEntry, Role, SearchField,
    SetRoleRequest, SignInRequest, SignInResponse, TeamListResponse, TeamPointsResponse,
    UserListQuery, UserListResponse, VerifyTeamRequest, VerifyTeamResponse,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "teamboard-cli")]
#[command(about = "CLI for administering teams, users and leaderboards via the backend API")]
#[command(
    long_about = "A command-line interface for the teamboard backend server.\n\n\
    Use `login` to obtain a session token, then export it as TEAMBOARD_TOKEN\n\
    to run the admin commands for teams and users."
)]
struct Cli {
    /// Backend server URL to connect to.
    ///
    /// The CLI will make HTTP requests to this server's API endpoints.
    /// Use this to connect to a remote server or a different port.
    #[arg(
        short,
        long,
        default_value = "http://localhost:3000",
        env = "TEAMBOARD_API_URL"
    )]
    base_url: String,

    /// Session token sent as a bearer header.
    ///
    /// Printed by the `login` command. Admin commands need a token
    /// belonging to an admin account.
    #[arg(short, long, env = "TEAMBOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password and print the session token
    Login {
        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "TEAMBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Manage teams - list, verify, and adjust points
    Teams {
        #[command(subcommand)]
        action: TeamAction,
    },
    /// Manage users - list, ban, change roles and points
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Show the public leaderboard
    Leaderboard {
        /// Rank individual users instead of verified teams
        #[arg(short, long)]
        users: bool,
    },
}

#[derive(Subcommand)]
enum TeamAction {
    /// List every team with its members and verification state
    List,

    /// Mark a team as verified
    ///
    /// Verified teams appear on the leaderboard and no longer accept
    /// new members.
    Verify {
        /// Team ID
        id: Uuid,
    },

    /// Remove the verified mark from a team
    Unverify {
        /// Team ID
        id: Uuid,
    },

    /// Add or subtract points from a team
    ///
    /// Negative values subtract. The total may not drop below zero.
    Points {
        /// Team ID
        id: Uuid,

        /// Points to add (use a negative value to subtract)
        #[arg(allow_negative_numbers = true)]
        delta: i32,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// List users, optionally filtered by name or email
    List {
        /// Substring to search for
        #[arg(short, long)]
        search: Option<String>,

        /// Search in names instead of emails
        #[arg(long)]
        by_name: bool,

        /// Maximum number of users to return (1-100)
        #[arg(short, long, default_value_t = 20)]
        limit: i64,

        /// Number of users to skip
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
    },

    /// Ban a user and revoke all of their sessions
    Ban {
        /// User ID
        id: Uuid,

        /// Reason shown to the user when they try to sign in
        #[arg(short, long)]
        reason: Option<String>,

        /// Ban duration in seconds (permanent if omitted)
        #[arg(short, long)]
        expires_in: Option<i64>,
    },

    /// Lift a ban
    Unban {
        /// User ID
        id: Uuid,
    },

    /// Add or subtract points from a user
    Points {
        /// User ID
        id: Uuid,

        /// Points to add (use a negative value to subtract)
        #[arg(allow_negative_numbers = true)]
        delta: i32,
    },

    /// Change a user's role
    Role {
        /// User ID
        id: Uuid,

        /// New role: "user" or "admin"
        #[arg(value_parser = parse_role)]
        role: Role,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_str(s).ok_or_else(|| format!("unknown role '{}' (expected user or admin)", s))
}

/// Small wrapper that attaches the bearer token and turns error bodies into messages
struct Api {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await.context("Failed to reach backend")?;
        let status = response.status();

        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("no error message");
            bail!("Request failed ({}): {}", status, message);
        }

        response
            .json()
            .await
            .context("Failed to parse backend response")
    }
}

fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base_url: cli.base_url,
        token: cli.token,
    };

    match cli.command {
        Commands::Login { email, password } => handle_login(&api, email, password).await?,
        Commands::Teams { action } => handle_teams(&api, action).await?,
        Commands::Users { action } => handle_users(&api, action).await?,
        Commands::Leaderboard { users } => handle_leaderboard(&api, users).await?,
    }

    Ok(())
}

async fn handle_login(api: &Api, email: String, password: String) -> anyhow::Result<()> {
    let req = SignInRequest { email, password };
    let response: SignInResponse = api.send(api.post("/auth/sign-in").json(&req)).await?;

    eprintln!(
        "Signed in as {} <{}> ({})",
        response.user.name,
        response.user.email,
        response.user.role.as_str()
    );
    println!("{}", response.token);
    Ok(())
}

async fn handle_teams(api: &Api, action: TeamAction) -> anyhow::Result<()> {
    match action {
        TeamAction::List => {
            let list: TeamListResponse = api.send(api.get("/admin/teams")).await?;
            if list.teams.is_empty() {
                println!("No teams found.");
            } else {
                for team in list.teams {
                    let status = if team.is_verified { "✓" } else { "○" };
                    println!(
                        "{} [{}] {} ({} pts, lead: {})",
                        status,
                        short_id(&team.id),
                        team.name,
                        team.points,
                        team.teamlead_name
                    );
                    for member in &team.members {
                        println!("    {} <{}>", member.name, member.email);
                    }
                }
            }
        }
        TeamAction::Verify { id } => set_verification(api, id, true).await?,
        TeamAction::Unverify { id } => set_verification(api, id, false).await?,
        TeamAction::Points { id, delta } => {
            let req = AdjustPointsRequest { delta };
            let team: TeamPointsResponse = api
                .send(api.post(&format!("/admin/teams/{}/points", id)).json(&req))
                .await?;
            println!(
                "[{}] {} now has {} points",
                short_id(&team.id),
                team.name,
                team.points
            );
        }
    }

    Ok(())
}

async fn set_verification(api: &Api, team_id: Uuid, is_verified: bool) -> anyhow::Result<()> {
    let req = VerifyTeamRequest {
        team_id,
        is_verified,
    };
    let response: VerifyTeamResponse = api
        .send(api.post("/admin/teams/verify").json(&req))
        .await?;
    println!("{}", response.message);
    Ok(())
}

async fn handle_users(api: &Api, action: UserAction) -> anyhow::Result<()> {
    match action {
        UserAction::List {
            search,
            by_name,
            limit,
            offset,
        } => {
            let query = UserListQuery {
                limit: Some(limit),
                offset: Some(offset),
                search_field: search.as_ref().map(|_| {
                    if by_name {
                        SearchField::Name
                    } else {
                        SearchField::Email
                    }
                }),
                search_value: search,
                ..Default::default()
            };
            let list: UserListResponse = api.send(api.get("/admin/users").query(&query)).await?;

            println!("{} users total", list.total);
            for user in list.users {
                print_user(&user);
            }
        }
        UserAction::Ban {
            id,
            reason,
            expires_in,
        } => {
            let req = BanUserRequest {
                ban_reason: reason,
                ban_expires_in: expires_in,
            };
            let user: AdminUserResponse = api
                .send(api.post(&format!("/admin/users/{}/ban", id)).json(&req))
                .await?;
            match user.ban_expires {
                Some(expires) => println!("Banned {} until {}", user.email, expires),
                None => println!("Banned {} permanently", user.email),
            }
        }
        UserAction::Unban { id } => {
            let user: AdminUserResponse = api
                .send(api.post(&format!("/admin/users/{}/unban", id)))
                .await?;
            println!("Unbanned {}", user.email);
        }
        UserAction::Points { id, delta } => {
            let req = AdjustPointsRequest { delta };
            let user: AdminUserResponse = api
                .send(api.post(&format!("/admin/users/{}/points", id)).json(&req))
                .await?;
            println!("{} now has {} points", user.email, user.points);
        }
        UserAction::Role { id, role } => {
            let req = SetRoleRequest { role };
            let user: AdminUserResponse = api
                .send(api.post(&format!("/admin/users/{}/role", id)).json(&req))
                .await?;
            println!("{} is now {}", user.email, user.role.as_str());
        }
    }

    Ok(())
}

fn print_user(user: &AdminUserResponse) {
    let banned = if user.banned { " [banned]" } else { "" };
    println!(
        "[{}] {} <{}> {} {} pts{}",
        short_id(&user.id),
        user.name,
        user.email,
        user.role.as_str(),
        user.points,
        banned
    );
    if let Some(team) = &user.team_name {
        println!("    Team: {}", team);
    }
}

async fn handle_leaderboard(api: &Api, users: bool) -> anyhow::Result<()> {
    let path = if users {
        "/leaderboard/users"
    } else {
        "/leaderboard"
    };
    let entries: Vec<LeaderboardEntry> = api.send(api.get(path)).await?;

    if entries.is_empty() {
        println!("Leaderboard is empty.");
    }
    for entry in entries {
        println!("{:>3}. {} ({} pts)", entry.rank, entry.name, entry.points);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_team_points_with_negative_delta() {
        let cli = Cli::try_parse_from([
            "teamboard-cli",
            "teams",
            "points",
            "7f1c9a52-1d7e-4f0e-9a55-1b2c3d4e5f60",
            "-15",
        ])
        .unwrap();

        match cli.command {
            Commands::Teams {
                action: TeamAction::Points { delta, .. },
            } => assert_eq!(delta, -15),
            _ => panic!("expected teams points"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_role() {
        let result = Cli::try_parse_from([
            "teamboard-cli",
            "users",
            "role",
            "7f1c9a52-1d7e-4f0e-9a55-1b2c3d4e5f60",
            "owner",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_api_url_joins_paths() {
        let api = Api {
            client: Client::new(),
            base_url: "http://localhost:3000/".to_string(),
            token: None,
        };
        assert_eq!(
            api.url("/admin/teams"),
            "http://localhost:3000/api/admin/teams"
        );
    }
}
