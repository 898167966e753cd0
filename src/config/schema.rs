use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "server": {
                "type": "object",
                "properties": {
                    "host": { "type": "string", "minLength": 1 },
                    "port": { "type": "integer", "minimum": 0, "maximum": 65535 }
                },
                "additionalProperties": false
            },
            "database": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "minLength": 1 }
                },
                "additionalProperties": false
            },
            "executor": {
                "type": "object",
                "properties": {
                    "workers": { "type": "integer", "minimum": 1 },
                    "simulated_delay_ms": { "type": "integer", "minimum": 0 },
                    "poll_interval_ms": { "type": "integer", "minimum": 1 },
                    "visibility_timeout_secs": { "type": "integer", "minimum": 1 },
                    "heartbeat_interval_secs": { "type": "integer", "minimum": 1 },
                    "stall_timeout_secs": { "type": "integer", "minimum": 1 },
                    "max_attempts": { "type": "integer", "minimum": 1 },
                    "reaper_interval_secs": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            },
            "auth": {
                "type": "object",
                "properties": {
                    "service_token": { "type": "string", "minLength": 16 },
                    "tokens": {
                        "type": "array",
                        "items": { "$ref": "#/$defs/token" }
                    }
                },
                "additionalProperties": false
            },
            "logging": {
                "type": "object",
                "properties": {
                    "format": { "type": "string", "enum": ["pretty", "json"] },
                    "level": { "type": "string" }
                },
                "additionalProperties": false
            }
        },
        "additionalProperties": false,
        "$defs": {
            "token": {
                "type": "object",
                "required": ["token", "owner_id"],
                "properties": {
                    "token": { "type": "string", "minLength": 16 },
                    "owner_id": { "type": "string", "minLength": 1 }
                }
            }
        }
    })
});
