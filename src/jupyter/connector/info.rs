use crate::core::context::InvocationContext;
use crate::core::errors::KernelError;
use crate::core::traits::KernelIntrospection;
use crate::core::types::{FormattedValue, KernelEvent, KernelValueInfo};
use crate::jupyter::connector::{await_reply, CANCELLED_MESSAGE};
use crate::jupyter::session::KernelSession;
use crate::jupyter::types::{
    DebugReply, DebugRequest, KernelInfoReply, KernelInfoRequest, STATUS_OK,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

/// Debug adapter command listing the kernel's variables
pub const INSPECT_VARIABLES_COMMAND: &str = "inspectVariables";

/// Debug adapter command rendering one variable as a MIME bundle
pub const RICH_INSPECT_VARIABLES_COMMAND: &str = "richInspectVariables";

/// Kernel info and variable listings
///
/// The last `kernel_info_reply` is cached; variable listings need it to know
/// whether the kernel has a debugger.
pub struct Introspection {
    session: Arc<KernelSession>,
    kernel_info: Mutex<Option<KernelInfoReply>>,
    debug_seq: AtomicU64,
}

impl Introspection {
    pub fn new(session: Arc<KernelSession>) -> Self {
        Self {
            session,
            kernel_info: Mutex::new(None),
            debug_seq: AtomicU64::new(0),
        }
    }

    /// Last kernel info received, if any
    pub fn kernel_info(&self) -> Option<KernelInfoReply> {
        match self.kernel_info.lock() {
            Ok(cached) => cached.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Store a reply obtained elsewhere, e.g. during the readiness handshake
    pub fn seed_kernel_info(&self, info: KernelInfoReply) {
        match self.kernel_info.lock() {
            Ok(mut cached) => *cached = Some(info),
            Err(poisoned) => *poisoned.into_inner() = Some(info),
        }
    }

    /// Round trip a `kernel_info_request`; `None` once a terminal event has been published
    async fn fetch_kernel_info(
        &self,
        context: &InvocationContext,
    ) -> Result<Option<KernelInfoReply>, KernelError> {
        if context.is_cancelled() {
            context.fail(CANCELLED_MESSAGE);
            return Ok(None);
        }

        let mut replies = self.session.send_request(&KernelInfoRequest {}).await?;
        let Some(info) = await_reply::<KernelInfoReply>(&mut replies, context).await? else {
            return Ok(None);
        };

        if info.status != STATUS_OK {
            context.fail(format!("kernel replied with status '{}'", info.status));
            return Ok(None);
        }

        self.seed_kernel_info(info.clone());
        Ok(Some(info))
    }

    /// Send a debug adapter request once the kernel is known to have a debugger
    ///
    /// `Ok(None)` means a terminal event has already been published.
    async fn debug(
        &self,
        command: &'static str,
        arguments: Value,
        caller: &str,
        context: &InvocationContext,
    ) -> Result<Option<DebugReply>, KernelError> {
        let info = match self.kernel_info() {
            Some(info) => info,
            None => match self.fetch_kernel_info(context).await? {
                Some(info) => info,
                None => return Ok(None),
            },
        };

        if !info.debugger {
            return Err(KernelError::NotImplemented(caller.to_string()));
        }
        if context.is_cancelled() {
            context.fail(CANCELLED_MESSAGE);
            return Ok(None);
        }

        let seq = self.debug_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let request = DebugRequest::new(seq, command).with_arguments(arguments);
        let mut replies = self.session.send_request(&request).await?;
        await_reply::<DebugReply>(&mut replies, context).await
    }
}

/// Map an `inspectVariables` response body to value infos
pub fn value_infos(body: &Value) -> Vec<KernelValueInfo> {
    let text = |entry: &Value, key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    body.get("variables")
        .and_then(Value::as_array)
        .map(|variables| {
            variables
                .iter()
                .filter_map(|entry| {
                    Some(KernelValueInfo {
                        name: text(entry, "name")?,
                        type_name: text(entry, "type"),
                        preview: text(entry, "value"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pick `mime_type` out of a `richInspectVariables` response body
///
/// Non-string renderings such as `application/json` are serialized.
pub fn rich_value(body: &Value, mime_type: &str) -> Option<FormattedValue> {
    let value = body.get("data")?.get(mime_type)?;
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    Some(FormattedValue::new(mime_type, text))
}

#[async_trait]
impl KernelIntrospection for Introspection {
    #[instrument(skip(self, context), fields(session = %self.session.session_id()))]
    async fn request_kernel_info(&self, context: &InvocationContext) -> Result<(), KernelError> {
        let Some(info) = self.fetch_kernel_info(context).await? else {
            return Ok(());
        };

        context.publish(KernelEvent::KernelInfoProduced {
            implementation: info.implementation,
            language_name: info.language_info.name,
            language_version: info.language_info.version,
            protocol_version: info.protocol_version,
            banner: info.banner,
        });
        context.succeed();
        Ok(())
    }

    #[instrument(skip(self, context), fields(session = %self.session.session_id()))]
    async fn request_value_infos(&self, context: &InvocationContext) -> Result<(), KernelError> {
        let Some(reply) = self
            .debug(
                INSPECT_VARIABLES_COMMAND,
                json!({}),
                "RequestValueInfos",
                context,
            )
            .await?
        else {
            return Ok(());
        };

        if !reply.success {
            context.fail(
                reply
                    .message
                    .unwrap_or_else(|| format!("{} failed", INSPECT_VARIABLES_COMMAND)),
            );
            return Ok(());
        }

        let value_infos = value_infos(&reply.body);
        debug!(count = value_infos.len(), "kernel listed variables");
        context.publish(KernelEvent::ValueInfosProduced { value_infos });
        context.succeed();
        Ok(())
    }

    #[instrument(skip(self, context), fields(session = %self.session.session_id()))]
    async fn request_value(
        &self,
        name: &str,
        mime_type: &str,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        let Some(reply) = self
            .debug(
                RICH_INSPECT_VARIABLES_COMMAND,
                json!({ "variableName": name }),
                "RequestValue",
                context,
            )
            .await?
        else {
            return Ok(());
        };

        let formatted_value = reply
            .success
            .then(|| rich_value(&reply.body, mime_type))
            .flatten();
        match formatted_value {
            Some(formatted_value) => {
                context.publish(KernelEvent::ValueProduced {
                    name: name.to_string(),
                    formatted_value,
                });
                context.succeed();
            }
            None => {
                debug!(success = reply.success, message = ?reply.message, "variable not rendered");
                context.fail(format!("Failed to get variable {}.", name));
            }
        }
        Ok(())
    }
}
