use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use url::Url;

use super::{RunDraft, RunSink};

const DEFAULT_EXPERIMENT_ID: &str = "0";

/// MLflow tracking-server sink. Each [`RunDraft`] becomes one MLflow run:
/// created, batch-logged, artifacts uploaded through the server's artifact
/// proxy, then marked FINISHED.
#[derive(Clone, Debug)]
pub struct MlflowSink {
    http: reqwest::Client,
    base: Url,
    experiment_id: String,
}

impl MlflowSink {
    pub fn new(tracking_uri: &str) -> Result<Self> {
        let base = Url::parse(tracking_uri)
            .with_context(|| format!("malformed tracking uri {tracking_uri}"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            experiment_id: DEFAULT_EXPERIMENT_ID.to_owned(),
        })
    }

    pub fn with_experiment(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = experiment_id.into();
        self
    }

    fn api(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("api/2.0/mlflow/{path}"))
            .context("malformed api path")
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.api(path)?)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?
            .error_for_status()
            .with_context(|| format!("{path} returned an error status"))?;
        // Some endpoints (log-batch, update) reply with an empty object.
        resp.json::<serde_json::Value>()
            .await
            .with_context(|| format!("{path} returned a malformed body"))
    }

    async fn create_run(&self, name: &str) -> Result<String> {
        let body = serde_json::json!({
            "experiment_id": self.experiment_id,
            "run_name": name,
            "start_time": now_millis(),
        });
        let response = self.post("runs/create", body).await?;
        extract_run_id(&response)
    }

    async fn log_batch(&self, run_id: &str, draft: &RunDraft) -> Result<()> {
        let timestamp = now_millis();
        let params: Vec<serde_json::Value> = draft
            .params
            .iter()
            .map(|(key, value)| serde_json::json!({ "key": key, "value": value }))
            .collect();
        let metrics: Vec<serde_json::Value> = draft
            .metrics
            .iter()
            .map(|(key, value)| {
                serde_json::json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 })
            })
            .collect();
        let body = serde_json::json!({
            "run_id": run_id,
            "params": params,
            "metrics": metrics,
        });
        self.post("runs/log-batch", body).await?;
        Ok(())
    }

    async fn put_artifact(&self, run_id: &str, path: &str, contents: &str) -> Result<()> {
        let url = self
            .base
            .join(&format!(
                "api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}",
                self.experiment_id, run_id, path
            ))
            .context("malformed artifact path")?;
        self.http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(contents.to_owned())
            .send()
            .await
            .with_context(|| format!("artifact upload {path} failed"))?
            .error_for_status()
            .with_context(|| format!("artifact upload {path} returned an error status"))?;
        Ok(())
    }

    async fn finish_run(&self, run_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "run_id": run_id,
            "status": "FINISHED",
            "end_time": now_millis(),
        });
        self.post("runs/update", body).await?;
        Ok(())
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn extract_run_id(response: &serde_json::Value) -> Result<String> {
    let run_id = response
        .pointer("/run/info/run_id")
        .and_then(|v| v.as_str())
        .context("runs/create response carries no run_id")?;
    Ok(run_id.to_owned())
}

#[async_trait]
impl RunSink for MlflowSink {
    async fn record(&self, draft: &RunDraft) -> Result<String> {
        let run_id = self.create_run(&draft.name).await?;
        self.log_batch(&run_id, draft).await?;
        for (path, contents) in &draft.artifacts {
            self.put_artifact(&run_id, path, contents).await?;
        }
        self.finish_run(&run_id).await?;
        debug!("recorded run {} as {}", draft.name, run_id);
        Ok(run_id)
    }
}
