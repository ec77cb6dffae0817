// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::{
    db::{MemoryStore, PgStore, PurchasingStore, RequisitionNumbering},
    models::{approval::Approver, quote::Buyer, tier::Tier},
    services::{
        approval_service::ApprovalService,
        authority::TierTable,
        dashboard_service::DashboardService,
        quote_service::QuoteService,
        requisition_service::{ApprovalPolicy, RequisitionService},
    },
};

/// Configuração lida do ambiente (`.env` é carregado pelo `main`).
#[derive(Debug, Clone)]
pub struct Settings {
    // Ausente: roda com o store em memória (modo de desenvolvimento)
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub server_addr: String,
    pub tiers: TierTable,
    pub policy: ApprovalPolicy,
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} inválida ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET deve ser definido")?;
        let server_addr = env_or("SERVER_ADDR", "0.0.0.0:3000".to_string())?;

        let defaults = TierTable::default();
        let tiers = TierTable::new(
            env_or("ALCADA_LIMITE_1", defaults.limit(Tier::Coordinator).unwrap_or(Decimal::from(5_000)))?,
            env_or("ALCADA_LIMITE_2", defaults.limit(Tier::Manager).unwrap_or(Decimal::from(25_000)))?,
            env_or("ALCADA_LIMITE_3", defaults.limit(Tier::Director).unwrap_or(Decimal::from(100_000)))?,
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;

        let default_policy = ApprovalPolicy::default();
        let policy = ApprovalPolicy {
            deadline_hours: env_or("APROVACAO_PRAZO_HORAS", default_policy.deadline_hours)?,
            reescalate_after_quoting: env_or(
                "REESCALAR_APOS_COTACAO",
                default_policy.reescalate_after_quoting,
            )?,
        };
        if policy.deadline_hours <= 0 {
            anyhow::bail!("APROVACAO_PRAZO_HORAS deve ser positivo");
        }

        Ok(Self {
            database_url,
            jwt_secret,
            server_addr,
            tiers,
            policy,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub jwt_secret: String,
    pub requisition_service: RequisitionService,
    pub quote_service: QuoteService,
    pub approval_service: ApprovalService,
    pub dashboard_service: DashboardService,
}

impl AppState {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let state = match &settings.database_url {
            Some(database_url) => {
                // Conecta ao banco de dados, usando '?' para propagar erros
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(3))
                    .connect(database_url)
                    .await
                    .context("Falha ao conectar no banco de dados")?;
                tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

                sqlx::migrate!()
                    .run(&db_pool)
                    .await
                    .context("Falha ao rodar as migrações do banco de dados")?;
                tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

                let store = Arc::new(PgStore::new(db_pool));
                Self::from_store(store.clone(), store, settings)
            }
            None => {
                tracing::warn!("DATABASE_URL não definida: usando store em memória com cadastro de demonstração");
                let store = Arc::new(demo_store());
                Self::from_store(store.clone(), store, settings)
            }
        };
        Ok(state)
    }

    /// Monta o gráfico de dependências sobre um store já criado.
    pub fn from_store(
        store: Arc<dyn PurchasingStore>,
        numbering: Arc<dyn RequisitionNumbering>,
        settings: &Settings,
    ) -> Self {
        let requisition_service = RequisitionService::new(
            store.clone(),
            numbering,
            settings.tiers.clone(),
            settings.policy.clone(),
        );
        let quote_service = QuoteService::new(store.clone());
        let approval_service = ApprovalService::new(store.clone(), requisition_service.clone());
        let dashboard_service = DashboardService::new(store);

        Self {
            jwt_secret: settings.jwt_secret.clone(),
            requisition_service,
            quote_service,
            approval_service,
            dashboard_service,
        }
    }
}

// Um aprovador por alçada e um comprador, para o modo sem banco
fn demo_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    for (name, tier) in [
        ("Coordenação", Tier::Coordinator),
        ("Gerência", Tier::Manager),
        ("Diretoria", Tier::Director),
        ("CEO", Tier::Executive),
    ] {
        store = store.with_approver(Approver {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("alcada{}@demo.local", tier.level()),
            tier,
            active: true,
        });
    }

    let buyer = Buyer {
        id: Uuid::new_v4(),
        name: "Compras".to_string(),
        email: "compras@demo.local".to_string(),
        active: true,
    };
    tracing::info!(comprador = %buyer.id, "Comprador de demonstração cadastrado");
    store.with_buyer(buyer)
}
