//! HTTP API over the Safe engine.
//!
//! Handlers are thin: they parse path parameters, hand the typed body to the
//! engine and map [`SafeError`] onto a status code with a JSON body of the form
//! `{"error": CODE, "message": text}`.

use axum::{
	extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use disburse_core::SafeEngine;
use disburse_types::{Address, Bytes, DistributionKind, Recipient, SafeError, SafeTransactionRequest, B256};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// State shared with every handler.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<SafeEngine>,
}

/// A [`SafeError`] rendered as an HTTP response.
pub struct ApiError(SafeError);

impl From<SafeError> for ApiError {
	fn from(err: SafeError) -> Self {
		ApiError(err)
	}
}

fn status_for(err: &SafeError) -> StatusCode {
	match err {
		SafeError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
		SafeError::NotFound(_) => StatusCode::NOT_FOUND,
		SafeError::NotAnOwner(_) => StatusCode::FORBIDDEN,
		SafeError::AlreadyProposed(_)
		| SafeError::DuplicateSigner(_)
		| SafeError::AlreadyExecuted { .. }
		| SafeError::StaleNonce { .. }
		| SafeError::NonceAhead { .. } => StatusCode::CONFLICT,
		SafeError::InsufficientSignatures { .. } | SafeError::ExecutionReverted { .. } => {
			StatusCode::UNPROCESSABLE_ENTITY
		}
		SafeError::ChainUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
		SafeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
		SafeError::HashMismatch { .. } | SafeError::Storage(_) | SafeError::Config(_) => {
			StatusCode::INTERNAL_SERVER_ERROR
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = status_for(&self.0);
		if self.0.is_fatal() || status.is_server_error() {
			error!(code = self.0.code(), "{}", self.0);
		} else {
			warn!(code = self.0.code(), "{}", self.0);
		}
		let body = json!({
			"error": self.0.code(),
			"message": self.0.to_string(),
		});
		(status, Json(body)).into_response()
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		ApiError(SafeError::invalid("body", rejection.body_text()))
	}
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// JSON body extractor whose failures use the API error format.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
	Json<T>: FromRequest<S, Rejection = JsonRejection>,
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
		let Json(value) = Json::<T>::from_request(req, state).await?;
		Ok(ApiJson(value))
	}
}

fn parse_hash(raw: &str) -> Result<B256, ApiError> {
	raw.parse()
		.map_err(|_| ApiError(SafeError::invalid("hash", "expected a 0x-prefixed 32-byte hash")))
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
	raw.parse()
		.map_err(|_| ApiError(SafeError::invalid("safe", "expected a 0x-prefixed address")))
}

/// Body of `POST /transactions/compute`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComputeBody {
	pub safe_address: Address,
	pub recipients: Vec<Recipient>,
}

/// Body of `POST /transactions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProposeBody {
	pub safe_address: Address,
	pub request: SafeTransactionRequest,
	/// Owner proposing. Must have produced `signature`.
	pub proposer: Address,
	pub signature: Bytes,
}

/// Body of `POST /transactions/{hash}/signatures`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignatureBody {
	pub signer: Address,
	pub signature: Bytes,
}

/// Body of `POST /distributions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateDistributionBody {
	pub kind: DistributionKind,
	pub recipients: Vec<Recipient>,
	#[serde(default)]
	pub created_by: Option<Address>,
}

/// Body of `POST /distributions/{id}/prepare`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrepareBody {
	pub safe_address: Address,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/transactions", post(propose))
		.route("/transactions/compute", post(compute))
		.route("/transactions/{hash}", get(get_transaction))
		.route("/transactions/{hash}/status", get(transaction_status))
		.route("/transactions/{hash}/signatures", post(add_signature))
		.route("/transactions/{hash}/execute", post(execute))
		.route("/transactions/{hash}/refresh", post(refresh))
		.route("/transactions/{hash}/audit", get(transaction_audit))
		.route("/safes/{safe}", get(safe_info))
		.route("/safes/{safe}/transactions", get(list_by_safe))
		.route("/distributions", get(list_distributions).post(create_distribution))
		.route("/distributions/{id}", get(get_distribution))
		.route("/distributions/{id}/prepare", post(prepare_distribution))
		.route("/distributions/{id}/propose", post(propose_distribution))
		.route("/distributions/{id}/reconcile", post(reconcile_distribution))
		.route("/distributions/{id}/audit", get(distribution_audit))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

/// Binds `host:port` and serves the API.
pub async fn serve(engine: Arc<SafeEngine>, host: &str, port: u16) -> anyhow::Result<()> {
	let app = router(AppState { engine });
	let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
	info!("API server listening on {}:{}", host, port);
	axum::serve(listener, app).await?;
	Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
	Json(json!({
		"status": "ok",
		"chainId": state.engine.chain_id(),
		"executor": state.engine.executor_address(),
	}))
}

async fn compute(
	State(state): State<AppState>,
	ApiJson(body): ApiJson<ComputeBody>,
) -> ApiResult<disburse_core::ComputedTransaction> {
	let computed = state
		.engine
		.compute_transaction(body.safe_address, &body.recipients)
		.await?;
	Ok(Json(computed))
}

async fn propose(
	State(state): State<AppState>,
	ApiJson(body): ApiJson<ProposeBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
	let tx = state
		.engine
		.propose(body.safe_address, body.request, body.proposer, body.signature)
		.await?;
	let url = state
		.engine
		.explorer_url(tx.safe_address, tx.transaction_hash);
	Ok((
		StatusCode::CREATED,
		Json(json!({ "transaction": tx, "explorerUrl": url })),
	))
}

async fn get_transaction(
	State(state): State<AppState>,
	Path(hash): Path<String>,
) -> ApiResult<disburse_types::PendingTransaction> {
	Ok(Json(state.engine.get(parse_hash(&hash)?).await?))
}

async fn transaction_status(
	State(state): State<AppState>,
	Path(hash): Path<String>,
) -> ApiResult<disburse_types::TransactionStatusView> {
	Ok(Json(state.engine.status(parse_hash(&hash)?).await?))
}

async fn add_signature(
	State(state): State<AppState>,
	Path(hash): Path<String>,
	ApiJson(body): ApiJson<SignatureBody>,
) -> ApiResult<disburse_types::SignatureProgress> {
	let progress = state
		.engine
		.add_signature(parse_hash(&hash)?, body.signer, body.signature)
		.await?;
	Ok(Json(progress))
}

async fn execute(
	State(state): State<AppState>,
	Path(hash): Path<String>,
) -> ApiResult<disburse_types::ExecutionReceipt> {
	Ok(Json(state.engine.execute(parse_hash(&hash)?).await?))
}

async fn refresh(
	State(state): State<AppState>,
	Path(hash): Path<String>,
) -> ApiResult<disburse_types::PendingTransaction> {
	Ok(Json(state.engine.refresh(parse_hash(&hash)?).await?))
}

async fn transaction_audit(
	State(state): State<AppState>,
	Path(hash): Path<String>,
) -> ApiResult<Vec<disburse_types::AuditEntry>> {
	let entries = state
		.engine
		.audit()
		.for_transaction(parse_hash(&hash)?)
		.await?;
	Ok(Json(entries))
}

async fn safe_info(
	State(state): State<AppState>,
	Path(safe): Path<String>,
) -> ApiResult<disburse_types::SafeState> {
	Ok(Json(state.engine.safe_info(parse_address(&safe)?).await?))
}

async fn list_by_safe(
	State(state): State<AppState>,
	Path(safe): Path<String>,
) -> ApiResult<Vec<disburse_types::PendingTransaction>> {
	Ok(Json(state.engine.list_by_safe(parse_address(&safe)?).await?))
}

async fn create_distribution(
	State(state): State<AppState>,
	ApiJson(body): ApiJson<CreateDistributionBody>,
) -> Result<(StatusCode, Json<disburse_types::Distribution>), ApiError> {
	let distribution = state
		.engine
		.distributions()
		.create(body.kind, body.recipients, body.created_by)
		.await?;
	Ok((StatusCode::CREATED, Json(distribution)))
}

async fn list_distributions(
	State(state): State<AppState>,
) -> ApiResult<Vec<disburse_types::Distribution>> {
	Ok(Json(state.engine.distributions().list().await?))
}

async fn get_distribution(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<disburse_types::Distribution> {
	Ok(Json(state.engine.distributions().get(&id).await?))
}

async fn prepare_distribution(
	State(state): State<AppState>,
	Path(id): Path<String>,
	ApiJson(body): ApiJson<PrepareBody>,
) -> ApiResult<disburse_core::ComputedTransaction> {
	let computed = state
		.engine
		.distributions()
		.prepare(&id, body.safe_address)
		.await?;
	Ok(Json(computed))
}

async fn propose_distribution(
	State(state): State<AppState>,
	Path(id): Path<String>,
	ApiJson(body): ApiJson<ProposeBody>,
) -> ApiResult<disburse_types::Distribution> {
	let distribution = state
		.engine
		.distributions()
		.propose(
			&id,
			body.safe_address,
			body.request,
			body.proposer,
			body.signature,
		)
		.await?;
	Ok(Json(distribution))
}

async fn reconcile_distribution(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<disburse_types::Distribution> {
	Ok(Json(state.engine.distributions().reconcile(&id).await?))
}

async fn distribution_audit(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<Vec<disburse_types::AuditEntry>> {
	Ok(Json(state.engine.audit().for_distribution(&id).await?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use alloy::signers::local::PrivateKeySigner;
	use alloy::signers::SignerSync;
	use async_trait::async_trait;
	use axum::body::Body;
	use axum::http::Request;
	use disburse_account::signature::encode;
	use disburse_builder::{BuilderSettings, TokenInfo, TokenRegistry, TransactionBuilder};
	use disburse_chain::{ChainError, ChainInterface, SubmittedExecution};
	use disburse_storage::implementations::memory::MemoryStorage;
	use disburse_storage::StorageService;
	use disburse_types::eip712::compute_hash;
	use disburse_types::{ExecutionRecord, SafeState, U256};
	use std::sync::Mutex;
	use tower::ServiceExt;

	const SAFE: Address = address!("0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a");
	const USDC: Address = address!("0x0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c");

	/// Single-owner Safe whose nonce advances on every execution.
	struct OneOwnerSafe {
		owner: Address,
		nonce: Mutex<U256>,
	}

	#[async_trait]
	impl ChainInterface for OneOwnerSafe {
		fn chain_id(&self) -> u64 {
			999
		}

		fn executor(&self) -> Address {
			Address::repeat_byte(0xee)
		}

		async fn safe_state(&self, _safe: Address) -> Result<SafeState, ChainError> {
			Ok(SafeState {
				nonce: *self.nonce.lock().unwrap(),
				threshold: 1,
				owners: vec![self.owner],
			})
		}

		async fn transaction_hash(
			&self,
			safe: Address,
			request: &SafeTransactionRequest,
		) -> Result<B256, ChainError> {
			Ok(compute_hash(safe, 999, request))
		}

		async fn execute(
			&self,
			_safe: Address,
			_request: &SafeTransactionRequest,
			_signatures: Bytes,
		) -> Result<SubmittedExecution, ChainError> {
			*self.nonce.lock().unwrap() += U256::from(1);
			Ok(SubmittedExecution {
				chain_tx_hash: B256::repeat_byte(0xcc),
				block_number: Some(1),
				inner_success: true,
			})
		}

		async fn find_execution(
			&self,
			_safe: Address,
			_hash: B256,
		) -> Result<Option<ExecutionRecord>, ChainError> {
			Ok(None)
		}
	}

	fn owner() -> PrivateKeySigner {
		PrivateKeySigner::from_bytes(&B256::repeat_byte(1)).unwrap()
	}

	fn app() -> Router {
		let chain = Arc::new(OneOwnerSafe {
			owner: owner().address(),
			nonce: Mutex::new(U256::ZERO),
		});
		let builder = TransactionBuilder::new(
			TokenRegistry::new([TokenInfo {
				symbol: "USDC".into(),
				address: USDC,
				decimals: 6,
			}]),
			BuilderSettings {
				multi_send_call_only: Address::repeat_byte(0x3d),
				max_batch_size: 10,
			},
		);
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		router(AppState {
			engine: Arc::new(SafeEngine::new(chain, storage, builder)),
		})
	}

	async fn call(
		app: &Router,
		method: &str,
		uri: &str,
		body: Option<serde_json::Value>,
	) -> (StatusCode, serde_json::Value) {
		let request = Request::builder()
			.method(method)
			.uri(uri)
			.header("content-type", "application/json");
		let request = match body {
			Some(body) => request.body(Body::from(body.to_string())).unwrap(),
			None => request.body(Body::empty()).unwrap(),
		};
		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
		(status, json)
	}

	#[tokio::test]
	async fn compute_propose_execute_over_http() {
		let app = app();
		let signer = owner();

		let (status, computed) = call(
			&app,
			"POST",
			"/transactions/compute",
			Some(json!({
				"safeAddress": SAFE,
				"recipients": [{
					"address": "0x1111111111111111111111111111111111111111",
					"amount": "2.5",
					"token": "USDC"
				}]
			})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		let hash: B256 = serde_json::from_value(computed["transactionHash"].clone()).unwrap();
		let signature = encode(&signer.sign_hash_sync(&hash).unwrap(), 27);

		let (status, _) = call(
			&app,
			"POST",
			"/transactions",
			Some(json!({
				"safeAddress": SAFE,
				"request": computed["request"],
				"proposer": signer.address(),
				"signature": signature,
			})),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);

		let (status, view) = call(&app, "GET", &format!("/transactions/{}/status", hash), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(view["readyToExecute"], true);

		let (status, receipt) =
			call(&app, "POST", &format!("/transactions/{}/execute", hash), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(receipt["signaturesUsed"], 1);

		let (status, err) =
			call(&app, "POST", &format!("/transactions/{}/execute", hash), None).await;
		assert_eq!(status, StatusCode::CONFLICT);
		assert_eq!(err["error"], "ALREADY_EXECUTED");
	}

	#[tokio::test]
	async fn errors_carry_code_and_status() {
		let app = app();
		let (status, err) = call(
			&app,
			"GET",
			&format!("/transactions/{}", B256::repeat_byte(1)),
			None,
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(err["error"], "NOT_FOUND");

		let (status, err) = call(&app, "GET", "/transactions/not-a-hash", None).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(err["error"], "INVALID_INPUT");

		let (status, err) = call(
			&app,
			"POST",
			"/transactions/compute",
			Some(json!({
				"safeAddress": SAFE,
				"recipients": [{ "address": "0x1111111111111111111111111111111111111111", "amount": "1", "token": "DOGE" }]
			})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(err["error"], "INVALID_INPUT");
	}

	#[tokio::test]
	async fn malformed_bodies_use_the_error_format() {
		let app = app();
		let uri = format!("/transactions/{}/signatures", B256::repeat_byte(1));

		let (status, err) = call(
			&app,
			"POST",
			&uri,
			Some(json!({ "signer": "0xnothex", "signature": "0x00" })),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(err["error"], "INVALID_INPUT");
		assert!(err["message"].as_str().unwrap().starts_with("Invalid body"));

		let (status, err) = call(
			&app,
			"POST",
			"/transactions/compute",
			Some(json!({ "safeAddress": SAFE, "recipients": [], "extra": 1 })),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(err["error"], "INVALID_INPUT");

		let request = Request::builder()
			.method("POST")
			.uri("/distributions")
			.header("content-type", "application/json")
			.body(Body::from("{not json"))
			.unwrap();
		let response = app.clone().oneshot(request).await.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn distributions_round_trip() {
		let app = app();
		let (status, created) = call(
			&app,
			"POST",
			"/distributions",
			Some(json!({
				"kind": "loyalty",
				"recipients": [
					{ "address": "0x1111111111111111111111111111111111111111", "amount": "1", "token": "USDC" },
					{ "address": "0x2222222222222222222222222222222222222222", "amount": "0.25", "token": "USDC" }
				]
			})),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(created["totals"]["USDC"], "1.25");
		let id = created["id"].as_str().unwrap().to_string();

		let (status, listed) = call(&app, "GET", "/distributions", None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(listed.as_array().unwrap().len(), 1);

		let (status, prepared) = call(
			&app,
			"POST",
			&format!("/distributions/{}/prepare", id),
			Some(json!({ "safeAddress": SAFE })),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(prepared["request"]["operation"], 1);

		let (status, audit) = call(&app, "GET", &format!("/distributions/{}/audit", id), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(audit[0]["action"], "created");
	}

	#[tokio::test]
	async fn safe_info_reports_owners() {
		let app = app();
		let (status, info) = call(&app, "GET", &format!("/safes/{}", SAFE), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(info["threshold"], 1);
		assert_eq!(info["owners"].as_array().unwrap().len(), 1);
	}
}
