//src/main.rs

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use compras::{
    config::{AppState, Settings},
    docs::ApiDoc,
    handlers,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logger: nível controlado por RUST_LOG (padrão "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Se a configuração falhar, a aplicação não deve iniciar.
    let settings = Settings::from_env()?;
    let app_state = AppState::new(&settings).await?;

    // Requisições
    let requisition_routes = Router::new()
        .route("/"
               ,post(handlers::requisitions::create_requisition)
               .get(handlers::requisitions::list_requisitions)
        )
        .route("/{id}", get(handlers::requisitions::get_requisition))
        .route("/{id}/itens", put(handlers::requisitions::revise_requisition))
        .route("/{id}/submeter", post(handlers::requisitions::submit_requisition))
        .route("/{id}/encaminhar-aprovacao", post(handlers::requisitions::route_for_approval))
        .route("/{id}/encaminhar-cotacao", post(handlers::requisitions::route_for_quoting))
        .route("/{id}/comprar", post(handlers::requisitions::purchase_requisition))
        .route("/{id}/cancelar", post(handlers::requisitions::cancel_requisition));

    // Cotações (compradores)
    let quote_routes = Router::new()
        .route("/", get(handlers::quotes::list_quotes))
        .route("/{id}", get(handlers::quotes::get_quote))
        .route("/{id}/fornecedores", post(handlers::quotes::register_bid))
        .route("/{id}/concluir", post(handlers::quotes::conclude_quote));

    // Aprovações: o link com token funciona sem login
    let approval_routes = Router::new()
        .route("/pendentes", get(handlers::approvals::list_pending))
        .route("/token/{token}", get(handlers::approvals::get_by_token))
        .route("/decisao", post(handlers::approvals::process_decision));

    // Combina tudo no router principal
    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/painel", get(handlers::dashboard::get_dashboard))
        .nest("/api/requisicoes", requisition_routes)
        .nest("/api/cotacoes", quote_routes)
        .nest("/api/aprovacoes", approval_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(app_state);

    // Inicia o servidor
    let listener = TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
