//! DynamoDB 后端：基于 aws-sdk-dynamodb，表使用 `timestamp`/`timestamp_2` 复合主键。
//!
//! 两个主键字段取同一个纳秒时间戳，只是为了满足表结构上的双字段要求。
//! SDK 自带的重试被关闭，重试策略由写队列负责。

use std::collections::HashMap;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info};
use crate::entry::HistoryEntry;
use crate::error::{HistoryError, Result};
use super::LogStore;

pub const TIMESTAMP_ATTR: &str = "timestamp";
pub const TIMESTAMP_RANGE_ATTR: &str = "timestamp_2";
pub const CONTENT_ATTR: &str = "content";

pub struct DynamoStore {
    client: Client,
    table: String,
}

impl DynamoStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// 加载默认 AWS 配置（环境变量、profile 等），可覆盖 region 和 endpoint
    pub async fn connect(
        table: String,
        region: Option<&str>,
        endpoint_url: Option<&str>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;
        if sdk_config.region().is_none() {
            return Err(HistoryError::Config(
                "no AWS region configured (set AWS_REGION or backend.region)".into(),
            ));
        }
        Ok(Self::new(Client::new(&sdk_config), table))
    }

    async fn create_table(&self) -> Result<()> {
        let bootstrap = |e: aws_sdk_dynamodb::error::BuildError| HistoryError::Bootstrap(e.to_string());

        let hash_attr = AttributeDefinition::builder()
            .attribute_name(TIMESTAMP_ATTR)
            .attribute_type(ScalarAttributeType::N)
            .build()
            .map_err(bootstrap)?;
        let range_attr = AttributeDefinition::builder()
            .attribute_name(TIMESTAMP_RANGE_ATTR)
            .attribute_type(ScalarAttributeType::N)
            .build()
            .map_err(bootstrap)?;
        let hash_key = KeySchemaElement::builder()
            .attribute_name(TIMESTAMP_ATTR)
            .key_type(KeyType::Hash)
            .build()
            .map_err(bootstrap)?;
        let range_key = KeySchemaElement::builder()
            .attribute_name(TIMESTAMP_RANGE_ATTR)
            .key_type(KeyType::Range)
            .build()
            .map_err(bootstrap)?;

        self.client
            .create_table()
            .table_name(&self.table)
            .attribute_definitions(hash_attr)
            .attribute_definitions(range_attr)
            .key_schema(hash_key)
            .key_schema(range_key)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| HistoryError::Bootstrap(format!("create table {}: {}", self.table, DisplayErrorContext(&e))))?;
        Ok(())
    }
}

/// 把一行 DynamoDB 记录解码成 HistoryEntry
pub fn decode_item(item: &HashMap<String, AttributeValue>) -> Result<HistoryEntry> {
    let timestamp = match item.get(TIMESTAMP_ATTR) {
        Some(AttributeValue::N(n)) => n
            .parse::<i64>()
            .map_err(|e| HistoryError::Decode(format!("timestamp {:?}: {}", n, e)))?,
        Some(other) => {
            return Err(HistoryError::Decode(format!("timestamp is not a number: {:?}", other)))
        }
        None => return Err(HistoryError::Decode("missing timestamp attribute".into())),
    };
    let content = match item.get(CONTENT_ATTR) {
        Some(AttributeValue::S(s)) => s.clone(),
        Some(other) => {
            return Err(HistoryError::Decode(format!("content is not a string: {:?}", other)))
        }
        None => return Err(HistoryError::Decode("missing content attribute".into())),
    };
    Ok(HistoryEntry { timestamp, content })
}

/// HistoryEntry 编码成 DynamoDB 记录
pub fn encode_item(entry: &HistoryEntry) -> HashMap<String, AttributeValue> {
    let ts = entry.timestamp.to_string();
    HashMap::from([
        (TIMESTAMP_ATTR.to_string(), AttributeValue::N(ts.clone())),
        (TIMESTAMP_RANGE_ATTR.to_string(), AttributeValue::N(ts)),
        (CONTENT_ATTR.to_string(), AttributeValue::S(entry.content.clone())),
    ])
}

#[async_trait]
impl LogStore for DynamoStore {
    async fn scan_all(&self) -> Result<Vec<HistoryEntry>> {
        let mut pages = self
            .client
            .scan()
            .table_name(&self.table)
            .into_paginator()
            .send();

        let mut entries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| HistoryError::Store(format!("scan {}: {}", self.table, DisplayErrorContext(&e))))?;
            for item in page.items.unwrap_or_default() {
                entries.push(decode_item(&item)?);
            }
        }
        debug!("scan {}: {} rows", self.table, entries.len());
        Ok(entries)
    }

    async fn put_one(&self, entry: &HistoryEntry) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(encode_item(entry)))
            .send()
            .await
            .map_err(|e| HistoryError::Store(format!("put {}: {}", self.table, DisplayErrorContext(&e))))?;
        Ok(())
    }

    async fn ensure_table(&self) -> Result<()> {
        match self.client.describe_table().table_name(&self.table).send().await {
            Ok(_) => {
                debug!("表 {} 已存在", self.table);
                Ok(())
            }
            Err(e) => match e.into_service_error() {
                DescribeTableError::ResourceNotFoundException(_) => {
                    info!("表 {} 不存在，正在创建", self.table);
                    self.create_table().await?;
                    info!("表 {} 已创建，变为 ACTIVE 之前写入会被重试", self.table);
                    Ok(())
                }
                other => Err(HistoryError::Bootstrap(format!(
                    "describe table {}: {}",
                    self.table,
                    DisplayErrorContext(&other)
                ))),
            },
        }
    }
}
