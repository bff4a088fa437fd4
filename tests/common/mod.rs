use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub const PASSWORD: &str = "password123";

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    _child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // In-memory stores keep the suite independent of a running Postgres
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_clinic-api"));
        cmd.env("CLINIC_API_PORT", port.to_string())
            .env("STORE_BACKEND", "memory")
            .env("JWT_SECRET", "integration-test-secret")
            .env("SECURITY_BCRYPT_COST", "4")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self {
            port,
            base_url,
            _child: child,
        })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!(
            "server did not become ready on {} within {:?}",
            self.base_url,
            timeout
        )
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Clinic name unique to one test so parallel tests share the server safely.
pub fn unique_clinic(prefix: &str) -> String {
    format!("{} {}", prefix, uuid::Uuid::new_v4().simple())
}

pub struct Clinic {
    pub token: String,
    pub join_code: String,
    pub slug: String,
    pub admin_email: String,
}

pub async fn create_clinic(server: &TestServer, name: &str) -> Result<Clinic> {
    let admin_email = format!("admin-{}@clinic.test", uuid::Uuid::new_v4().simple());
    let res = reqwest::Client::new()
        .post(server.url("/auth/clinics"))
        .json(&json!({
            "clinic_name": name,
            "admin_name": "Clinic Admin",
            "email": admin_email,
            "password": PASSWORD,
        }))
        .send()
        .await?;
    anyhow::ensure!(
        res.status() == StatusCode::CREATED,
        "clinic signup failed: {}",
        res.status()
    );

    let body: Value = res.json().await?;
    let data = &body["data"];
    Ok(Clinic {
        token: data["token"].as_str().context("token")?.to_string(),
        join_code: data["clinic"]["join_code"]
            .as_str()
            .context("join_code")?
            .to_string(),
        slug: data["clinic"]["slug"].as_str().context("slug")?.to_string(),
        admin_email,
    })
}

pub async fn join_clinic(
    server: &TestServer,
    join_code: &str,
    email: &str,
    role: &str,
) -> Result<reqwest::Response> {
    Ok(reqwest::Client::new()
        .post(server.url("/auth/join"))
        .json(&json!({
            "join_code": join_code,
            "name": "Member",
            "email": email,
            "password": PASSWORD,
            "role": role,
        }))
        .send()
        .await?)
}
