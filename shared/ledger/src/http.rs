use anyhow::Result;
use escrow_lending_core::{DealRecord, RecordId, UserId};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::{DealLedger, PersistError};

#[derive(Deserialize)]
struct CreatedDeal {
    id: u64,
}

/// Client for the ledger storage API (`POST /deals`, `GET /deals?userId=`).
pub struct HttpDealLedger {
    client: reqwest::Client,
    deals_url: reqwest::Url,
}

impl HttpDealLedger {
    pub fn new(mut base_url: reqwest::Url) -> Result<Self> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let deals_url = base_url.join("deals")?;
        debug!("deal ledger at {deals_url}");
        Ok(Self {
            client: reqwest::Client::new(),
            deals_url,
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PersistError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport(e: reqwest::Error) -> PersistError {
    PersistError::Transport(e.to_string())
}

fn malformed(e: reqwest::Error) -> PersistError {
    PersistError::MalformedResponse(e.to_string())
}

#[async_trait::async_trait]
impl DealLedger for HttpDealLedger {
    async fn append(&self, record: &DealRecord) -> Result<RecordId, PersistError> {
        trace!("POST {} {:?}", self.deals_url, record);
        let response = self
            .client
            .post(self.deals_url.clone())
            .json(record)
            .send()
            .await
            .map_err(transport)?;
        let created: CreatedDeal = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(malformed)?;
        Ok(RecordId::new(created.id))
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<DealRecord>, PersistError> {
        let response = self
            .client
            .get(self.deals_url.clone())
            .query(&[("userId", u64::from(user_id))])
            .send()
            .await
            .map_err(transport)?;
        let mut deals: Vec<DealRecord> = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(malformed)?;
        // storage returns insertion order
        deals.reverse();
        Ok(deals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use escrow_lending_core::{DealKind, TxHash};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn ledger_at(server: &MockServer) -> HttpDealLedger {
        HttpDealLedger::new(format!("{}/api", server.uri()).parse().unwrap()).unwrap()
    }

    fn row(kind: &str, amount: &str, day: u32) -> serde_json::Value {
        json!({
            "id": day,
            "type": kind,
            "amount": amount,
            "interestGained": "0",
            "dateTime": Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            "userId": 7,
        })
    }

    #[test]
    fn deals_url_keeps_base_path() {
        let ledger = HttpDealLedger::new("http://localhost:3000/api".parse().unwrap()).unwrap();
        assert_eq!(ledger.deals_url.as_str(), "http://localhost:3000/api/deals");

        let ledger = HttpDealLedger::new("http://localhost:3000/".parse().unwrap()).unwrap();
        assert_eq!(ledger.deals_url.as_str(), "http://localhost:3000/deals");
    }

    #[tokio::test]
    async fn append_posts_ledger_fields_and_returns_the_row_id() {
        let server = MockServer::start().await;
        let tx_hash: TxHash = format!("0x{:064x}", 5).parse().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/deals"))
            .and(body_partial_json(json!({
                "type": "deposit",
                "amount": "1000",
                "interestGained": "0",
                "userId": 7,
                "txHash": tx_hash.to_string(),
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 12})))
            .expect(1)
            .mount(&server)
            .await;

        let record = DealRecord::deposit(UserId::new(7), 1000, Some(tx_hash));
        let id = ledger_at(&server).append(&record).await.unwrap();
        assert_eq!(id, RecordId::new(12));
    }

    #[tokio::test]
    async fn listing_is_most_recent_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/deals"))
            .and(query_param("userId", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                row("deposit", "1000", 1),
                row("withdraw", "1045", 2),
            ])))
            .mount(&server)
            .await;

        let deals = ledger_at(&server).list_by_user(UserId::new(7)).await.unwrap();
        let summary: Vec<(DealKind, u128)> = deals.iter().map(|d| (d.kind, d.amount)).collect();
        assert_eq!(
            summary,
            vec![(DealKind::Withdraw, 1045), (DealKind::Deposit, 1000)]
        );
    }

    #[tokio::test]
    async fn error_status_keeps_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("storage offline"))
            .mount(&server)
            .await;

        let record = DealRecord::deposit(UserId::new(7), 1000, None);
        assert_eq!(
            ledger_at(&server).append(&record).await,
            Err(PersistError::Status {
                status: 503,
                body: "storage offline".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            ledger_at(&server).list_by_user(UserId::new(7)).await,
            Err(PersistError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_storage_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ledger = HttpDealLedger::new(format!("http://{addr}/api").parse().unwrap()).unwrap();
        let record = DealRecord::deposit(UserId::new(7), 1000, None);
        assert!(matches!(
            ledger.append(&record).await,
            Err(PersistError::Transport(_))
        ));
    }
}
