//! The per-connection session engine.
//!
//! Each accepted connection gets its own task running [`handle_client`]:
//! a single-threaded loop that reads one message at a time, routes it
//! through the `(state, kind, method)` table, and writes any replies before
//! touching the next message. Connections share nothing but the advisory
//! live-client counter and the read-only module schema, so there is no
//! cross-connection locking anywhere.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lsp_types::{
    ClientCapabilities, CompletionOptions, CompletionParams, Diagnostic,
    DidChangeConfigurationParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidSaveTextDocumentParams, DocumentHighlightParams, ExecuteCommandOptions,
    ExecuteCommandParams, GotoDefinitionParams, HoverParams, HoverProviderCapability,
    InitializeParams, InitializeResult, MessageType, OneOf, PublishDiagnosticsParams,
    ReferenceParams, RenameParams, ServerCapabilities, ServerInfo, ShowMessageParams,
    ShowMessageRequestParams, TextDocumentSyncCapability, TextDocumentSyncKind,
    WorkDoneProgressOptions,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::compiler::Compiler;
use crate::config::SessionConfig;
use crate::diagnostics;
use crate::error::ServerError;
use crate::features;
use crate::features::commands::{self, COMPILE_ALL_RULES, COMPILE_RULE};
use crate::rpc::{self, Message};
use crate::schema::ModuleSchema;
use crate::session::{Session, SessionState};
use crate::transport::{MessageReader, MessageWriter};

/// Whether an inbound message expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
}

/// Handler selected for one `(state, kind, method)` combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Initialize,
    Shutdown,
    Completion,
    Definition,
    Hover,
    References,
    Rename,
    Highlight,
    ExecuteCommand,
    Initialized,
    Exit,
    DidChangeConfiguration,
    DidChange,
    DidClose,
    DidSave,
}

/// What the connection loop should do after one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Terminate,
}

/// The method routing table. `None` means the message is silently dropped:
/// unknown methods, requests before the handshake, and anything after
/// termination all land there.
pub fn route(state: SessionState, kind: MessageKind, method: &str) -> Option<Route> {
    use MessageKind::{Notification, Request};
    use SessionState::{Active, Idle};
    match (state, kind, method) {
        (Idle, Request, "initialize") => Some(Route::Initialize),
        (Idle, Notification, "initialized") => Some(Route::Initialized),
        (Active, Request, "shutdown") => Some(Route::Shutdown),
        (Active, Request, "textDocument/completion") => Some(Route::Completion),
        (Active, Request, "textDocument/definition") => Some(Route::Definition),
        (Active, Request, "textDocument/hover") => Some(Route::Hover),
        (Active, Request, "textDocument/references") => Some(Route::References),
        (Active, Request, "textDocument/rename") => Some(Route::Rename),
        (Active, Request, "textDocument/documentHighlight") => Some(Route::Highlight),
        (Active, Request, "workspace/executeCommand") => Some(Route::ExecuteCommand),
        (Active, Notification, "exit") => Some(Route::Exit),
        (Active, Notification, "workspace/didChangeConfiguration") => {
            Some(Route::DidChangeConfiguration)
        }
        (Active, Notification, "textDocument/didChange") => Some(Route::DidChange),
        (Active, Notification, "textDocument/didClose") => Some(Route::DidClose),
        (Active, Notification, "textDocument/didSave") => Some(Route::DidSave),
        _ => None,
    }
}

/// Announce support only for the features the client can dynamically
/// register. Omitted features are left out of the payload entirely.
pub fn negotiate(client: &ClientCapabilities, compiler_available: bool) -> ServerCapabilities {
    let document = client.text_document.as_ref();
    let workspace = client.workspace.as_ref();
    let dynamic = |flag: Option<Option<bool>>| flag.flatten().unwrap_or(false);

    let mut capabilities = ServerCapabilities::default();
    if dynamic(document.map(|d| d.completion.as_ref().and_then(|c| c.dynamic_registration))) {
        capabilities.completion_provider = Some(CompletionOptions {
            // no resolve-on-demand support for completion items
            resolve_provider: Some(false),
            trigger_characters: Some(vec![".".to_string()]),
            ..CompletionOptions::default()
        });
    }
    if dynamic(document.map(|d| d.definition.as_ref().and_then(|c| c.dynamic_registration))) {
        capabilities.definition_provider = Some(OneOf::Left(true));
    }
    if dynamic(document.map(|d| d.hover.as_ref().and_then(|c| c.dynamic_registration))) {
        capabilities.hover_provider = Some(HoverProviderCapability::Simple(true));
    }
    if dynamic(document.map(|d| d.references.as_ref().and_then(|c| c.dynamic_registration))) {
        capabilities.references_provider = Some(OneOf::Left(true));
    }
    if dynamic(document.map(|d| d.rename.as_ref().and_then(|c| c.dynamic_registration))) {
        capabilities.rename_provider = Some(OneOf::Left(true));
    }
    if dynamic(document.map(|d| {
        d.synchronization
            .as_ref()
            .and_then(|c| c.dynamic_registration)
    })) {
        // documents are synced by always sending their full content
        capabilities.text_document_sync =
            Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL));
    }
    if dynamic(workspace.map(|w| {
        w.execute_command
            .as_ref()
            .and_then(|c| c.dynamic_registration)
    })) {
        capabilities.execute_command_provider = Some(ExecuteCommandOptions {
            commands: commands::advertised_commands(compiler_available),
            work_done_progress_options: WorkDoneProgressOptions::default(),
        });
    }
    capabilities
}

enum DispatchError {
    /// The connection is no longer usable; the loop ends.
    Io(io::Error),
    /// A non-fatal failure, surfaced to the client as a show-message
    /// notification.
    Server(ServerError),
}

impl From<io::Error> for DispatchError {
    fn from(err: io::Error) -> Self {
        DispatchError::Io(err)
    }
}

impl From<ServerError> for DispatchError {
    fn from(err: ServerError) -> Self {
        DispatchError::Server(err)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Io(err.into())
    }
}

pub struct YaraLanguageServer<C> {
    compiler: Option<C>,
    clients: AtomicUsize,
    diagnostics_warned: AtomicBool,
}

impl<C: Compiler> YaraLanguageServer<C> {
    pub fn new(compiler: Option<C>) -> Self {
        Self {
            compiler,
            clients: AtomicUsize::new(0),
            diagnostics_warned: AtomicBool::new(false),
        }
    }

    pub fn compiler_available(&self) -> bool {
        self.compiler.is_some()
    }

    /// Number of currently connected clients. Advisory only.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Accept connections forever, one independent handling task each.
    pub async fn serve(self: std::sync::Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            tracing::info!(%peer, "accepted connection");
            let server = std::sync::Arc::clone(&self);
            tokio::spawn(async move {
                let (reader, writer) = socket.into_split();
                server.handle_client(reader, writer).await;
            });
        }
    }

    /// Serve one connection to completion: EOF or an explicit exit.
    pub async fn handle_client<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = MessageReader::new(reader);
        let mut writer = MessageWriter::new(writer);
        let mut session = Session::new();
        self.clients.fetch_add(1, Ordering::SeqCst);
        tracing::info!("client connected");

        loop {
            // defensive eviction: with no registered clients left there is
            // nobody to serve this overlay to
            if self.clients.load(Ordering::SeqCst) == 0 {
                session.clear_overlay();
            }
            let message = match reader.read().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::warn!("client has closed");
                    break;
                }
                Err(err) => {
                    tracing::error!(%err, "dropping connection after transport error");
                    break;
                }
            };
            if message.jsonrpc.is_empty() {
                continue;
            }
            match self.dispatch(&mut session, &mut writer, &message).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Terminate) => {
                    session.state = SessionState::Terminated;
                    session.clear_overlay();
                    tracing::info!("server exiting connection loop per client request");
                    break;
                }
                Err(DispatchError::Io(err)) => {
                    tracing::error!(%err, "write failed, dropping connection");
                    break;
                }
                Err(DispatchError::Server(err)) => {
                    let typ = if err.is_warning() {
                        tracing::warn!("{err}");
                        MessageType::WARNING
                    } else {
                        tracing::error!("{err}");
                        MessageType::ERROR
                    };
                    let params = ShowMessageParams {
                        typ,
                        message: err.to_string(),
                    };
                    let note = rpc::notification(
                        "window/showMessage",
                        serde_json::to_value(params).unwrap_or(Value::Null),
                    );
                    if writer.write(&note).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.clients.fetch_sub(1, Ordering::SeqCst);
        tracing::info!("disconnected client");
    }

    async fn dispatch<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        message: &Message,
    ) -> Result<Outcome, DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let kind = if message.is_request() {
            MessageKind::Request
        } else if message.is_notification() {
            MessageKind::Notification
        } else {
            // a client-originated reply; nothing to do
            return Ok(Outcome::Continue);
        };
        let method = message.method();
        tracing::debug!(method, "client sent a message");
        let selected = match route(session.state, kind, method) {
            Some(selected) => selected,
            None => {
                tracing::debug!(method, "no route for message, dropping");
                return Ok(Outcome::Continue);
            }
        };
        let id = message.id.clone().unwrap_or(Value::Null);
        let params = message.params();

        match selected {
            Route::Initialize => self.on_initialize(session, writer, &id, params).await?,
            Route::Initialized => {
                session.state = SessionState::Active;
                tracing::info!("client has been successfully initialized");
                let params = ShowMessageRequestParams {
                    typ: MessageType::INFO,
                    message: "Successfully connected".to_string(),
                    actions: None,
                };
                self.notify(writer, "window/showMessageRequest", serde_json::to_value(params)?)
                    .await?;
            }
            Route::Shutdown => {
                tracing::info!("client requested shutdown");
                session.clear_overlay();
                writer.write(&rpc::response(&id, serde_json::json!({}))).await?;
            }
            Route::Exit => return Ok(Outcome::Terminate),
            Route::Completion => self.on_completion(session, writer, &id, params).await?,
            Route::Definition => self.on_definition(session, writer, &id, params).await?,
            Route::Hover => self.on_hover(session, writer, &id, params).await?,
            Route::References => self.on_references(session, writer, &id, params).await?,
            Route::Rename => self.on_rename(session, writer, &id, params).await?,
            Route::Highlight => self.on_highlight(session, writer, &id, params).await?,
            Route::ExecuteCommand => self.on_execute_command(session, writer, &id, params).await?,
            Route::DidChangeConfiguration => {
                if let Ok(params) = serde_json::from_value::<DidChangeConfigurationParams>(params) {
                    session.config = SessionConfig::from_settings(&params.settings);
                    tracing::debug!(config = ?session.config, "changed workspace config");
                }
            }
            Route::DidChange => {
                if let Ok(params) = serde_json::from_value::<DidChangeTextDocumentParams>(params) {
                    let uri = params.text_document.uri;
                    for change in params.content_changes {
                        // full text is submitted with each change
                        if !change.text.is_empty() {
                            session.update_overlay(uri.clone(), change.text);
                        }
                    }
                }
            }
            Route::DidClose => {
                if let Ok(params) = serde_json::from_value::<DidCloseTextDocumentParams>(params) {
                    session.remove_overlay(&params.text_document.uri);
                }
            }
            Route::DidSave => self.on_did_save(session, writer, params).await?,
        }
        Ok(Outcome::Continue)
    }

    async fn on_initialize<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!(%err, "malformed initialize params, ignoring request");
                return Ok(());
            }
        };
        session.workspace = params.root_uri.and_then(|uri| uri.to_file_path().ok());
        match &session.workspace {
            Some(root) => tracing::info!(root = %root.display(), "client workspace folder"),
            None => tracing::info!("no client workspace specified"),
        }
        if let Some(formats) = params
            .capabilities
            .text_document
            .as_ref()
            .and_then(|d| d.hover.as_ref())
            .and_then(|h| h.content_format.clone())
        {
            session.hover_formats = formats;
        }
        let result = InitializeResult {
            capabilities: negotiate(&params.capabilities, self.compiler_available()),
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        };
        writer
            .write(&rpc::response(id, serde_json::to_value(result)?))
            .await?;
        Ok(())
    }

    async fn on_completion<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: CompletionParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let uri = params.text_document_position.text_document.uri;
        let document = session
            .resolve_document(&uri)
            .map_err(|err| ServerError::Completion(err.to_string()))?;
        let trigger = params
            .context
            .and_then(|context| context.trigger_character)
            .unwrap_or_else(|| ".".to_string());
        let items = features::completion::code_completion(
            &document,
            params.text_document_position.position,
            &trigger,
            ModuleSchema::global(),
        )?;
        writer
            .write(&rpc::response(id, serde_json::to_value(items)?))
            .await?;
        Ok(())
    }

    async fn on_definition<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: GotoDefinitionParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let position = params.text_document_position_params;
        let uri = position.text_document.uri.clone();
        let document = session
            .resolve_document(&uri)
            .map_err(|err| ServerError::Definition(err.to_string()))?;
        let locations = features::definition::goto_definition(&document, position.position, &uri)?;
        writer
            .write(&rpc::response(id, serde_json::to_value(locations)?))
            .await?;
        Ok(())
    }

    async fn on_hover<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: HoverParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let position = params.text_document_position_params;
        let uri = position.text_document.uri.clone();
        let document = session.resolve_document(&uri)?;
        let hover = features::hover::hover(&document, position.position, &uri)?;
        let result = match hover {
            Some(hover) => serde_json::to_value(hover)?,
            None => Value::Null,
        };
        writer.write(&rpc::response(id, result)).await?;
        Ok(())
    }

    async fn on_references<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: ReferenceParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let position = params.text_document_position;
        let uri = position.text_document.uri.clone();
        let document = session.resolve_document(&uri)?;
        let locations = features::references::find_references(&document, position.position, &uri)?;
        writer
            .write(&rpc::response(id, serde_json::to_value(locations)?))
            .await?;
        Ok(())
    }

    async fn on_rename<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: RenameParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let position = params.text_document_position;
        let uri = position.text_document.uri.clone();
        let document = session.resolve_document(&uri)?;
        let edit =
            features::rename::rename(&document, position.position, &uri, &params.new_name)?;
        writer
            .write(&rpc::response(id, serde_json::to_value(edit)?))
            .await?;
        Ok(())
    }

    async fn on_highlight<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: DocumentHighlightParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let position = params.text_document_position_params;
        let document = session
            .resolve_document(&position.text_document.uri)
            .map_err(|err| ServerError::Highlight(err.to_string()))?;
        let highlights = features::document_highlight(&document, position.position);
        writer
            .write(&rpc::response(id, serde_json::to_value(highlights)?))
            .await?;
        Ok(())
    }

    async fn on_execute_command<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        id: &Value,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: ExecuteCommandParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        match params.command.as_str() {
            COMPILE_RULE => {
                // intentionally inert; kept so clients binding the command
                // get a well-formed reply
                tracing::info!("compiling rule per user's request");
            }
            COMPILE_ALL_RULES => {
                let outcome = self.compile_all_rules(session, writer).await;
                match outcome {
                    Ok(()) => {}
                    Err(DispatchError::Server(err)) => {
                        tracing::error!("{err}");
                        let reply =
                            rpc::error_response(id, rpc::INTERNAL_ERROR, &err.to_string());
                        writer.write(&reply).await?;
                        return Ok(());
                    }
                    Err(other) => return Err(other),
                }
            }
            unknown => {
                let arguments: Vec<String> = params
                    .arguments
                    .iter()
                    .map(|argument| argument.to_string())
                    .collect();
                tracing::warn!(command = unknown, ?arguments, "unknown command");
            }
        }
        writer.write(&rpc::response(id, Value::Null)).await?;
        Ok(())
    }

    async fn compile_all_rules<W>(
        &self,
        session: &Session,
        writer: &mut MessageWriter<W>,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let documents =
            commands::collect_documents(session.overlay(), session.workspace.as_deref())?;
        let published =
            commands::compile_all(documents, |text| self.provide_diagnostic(text))?;
        for params in published {
            self.publish_diagnostics(writer, params).await?;
        }
        Ok(())
    }

    async fn on_did_save<W>(
        &self,
        session: &mut Session,
        writer: &mut MessageWriter<W>,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        let params: DidSaveTextDocumentParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(_) => return Ok(()),
        };
        let uri = params.text_document.uri;
        // the file is no longer dirty once saved
        session.remove_overlay(&uri);
        let diagnostics = if session.config.compile_on_save {
            let document = session.resolve_document(&uri)?;
            self.provide_diagnostic(&document)?
        } else {
            // an empty publish clears anything previously shown
            Vec::new()
        };
        self.publish_diagnostics(writer, PublishDiagnosticsParams::new(uri, diagnostics, None))
            .await?;
        Ok(())
    }

    /// Compile one document and translate the verdict. Without a compiler
    /// the first call raises the one-time unavailability notice and every
    /// later call silently reports a clean document.
    fn provide_diagnostic(&self, document: &str) -> Result<Vec<Diagnostic>, ServerError> {
        match &self.compiler {
            Some(compiler) => {
                let status = compiler
                    .compile(document)
                    .map_err(|err| ServerError::Diagnostic(err.to_string()))?;
                diagnostics::from_status(document, status)
            }
            None => {
                if self.diagnostics_warned.swap(true, Ordering::SeqCst) {
                    Ok(Vec::new())
                } else {
                    Err(ServerError::CompilerUnavailable)
                }
            }
        }
    }

    async fn publish_diagnostics<W>(
        &self,
        writer: &mut MessageWriter<W>,
        params: PublishDiagnosticsParams,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        self.notify(
            writer,
            "textDocument/publishDiagnostics",
            serde_json::to_value(params)?,
        )
        .await
    }

    async fn notify<W>(
        &self,
        writer: &mut MessageWriter<W>,
        method: &str,
        params: Value,
    ) -> Result<(), DispatchError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write(&rpc::notification(method, params)).await?;
        Ok(())
    }
}
