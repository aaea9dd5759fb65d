//! Top-level application state: the storage handle plus the in-memory chat
//! registry. Every mutation goes through a method here so the persistence
//! write is explicit.

use crate::chat::{Chat, ChatConfig, ChatRecord, Model};
use crate::storage::Storage;
use crate::AppError;
use std::collections::HashMap;
use std::path::Path;

pub struct Session {
    storage: Storage,
    chats: HashMap<String, Chat>,
}

impl Session {
    /// Loads every stored chat into the registry. A storage failure here is
    /// fatal to the data layer and surfaces to the caller.
    pub fn bootstrap(storage: Storage) -> Result<Self, AppError> {
        let mut chats = HashMap::new();
        for stored in storage.read_all()? {
            chats.insert(stored.id.clone(), Chat::from_record(stored.id, stored.record));
        }
        tracing::info!(chats = chats.len(), "session ready");
        Ok(Self { storage, chats })
    }

    /// Opens the database at `path` and bootstraps from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        Self::bootstrap(Storage::open(path)?)
    }

    /// Opens the platform-default database and bootstraps from it.
    pub fn open_default() -> Result<Self, AppError> {
        Self::bootstrap(Storage::open_default()?)
    }

    /// Creates and persists an empty chat; the store assigns its id.
    pub fn create_chat(
        &mut self,
        name: impl Into<String>,
        model: Model,
        config: ChatConfig,
    ) -> Result<&Chat, AppError> {
        let name = name.into();
        let record = ChatRecord {
            name: name.clone(),
            model: model.clone(),
            messages: Vec::new(),
            config: (&config).into(),
        };
        let id = self.storage.create(&record)?;
        tracing::info!(%id, "chat created");
        let chat = Chat::new(id.clone(), name, model, config);
        Ok(self.chats.entry(id).or_insert(chat))
    }

    /// Removes the chat from both the store and the registry.
    pub fn remove_chat(&mut self, id: &str) -> Result<(), AppError> {
        if !self.chats.contains_key(id) {
            return Err(AppError::UnknownChat(id.to_string()));
        }
        self.storage.delete(id)?;
        self.chats.remove(id);
        tracing::info!(%id, "chat removed");
        Ok(())
    }

    /// Sends a prompt on the given chat and waits for the reply.
    pub async fn send(&mut self, id: &str, prompt: &str) -> Result<(), AppError> {
        let chat = self
            .chats
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownChat(id.to_string()))?;
        chat.send(prompt, &mut self.storage).await
    }

    pub fn rename_chat(&mut self, id: &str, name: impl Into<String>) -> Result<(), AppError> {
        let chat = self
            .chats
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownChat(id.to_string()))?;
        chat.rename(name, &mut self.storage)
    }

    pub fn set_chat_model(&mut self, id: &str, model: Model) -> Result<(), AppError> {
        let chat = self
            .chats
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownChat(id.to_string()))?;
        chat.set_model(model, &mut self.storage)
    }

    pub fn set_chat_config(&mut self, id: &str, config: ChatConfig) -> Result<(), AppError> {
        let chat = self
            .chats
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownChat(id.to_string()))?;
        chat.set_config(config, &mut self.storage)
    }

    pub fn chat(&self, id: &str) -> Option<&Chat> {
        self.chats.get(id)
    }

    /// Chats in no particular order.
    pub fn chats(&self) -> impl Iterator<Item = &Chat> {
        self.chats.values()
    }

    /// Chat ids in ascending key order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chats.keys().cloned().collect();
        ids.sort_by_key(|id| id.parse::<i64>().unwrap_or(i64::MAX));
        ids
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::provider::{ProviderConfig, ProviderError, ProviderKind};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::new("llama3.2", ProviderConfig::ollama("http://localhost:11434"))
    }

    fn session() -> Session {
        Session::bootstrap(Storage::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn create_registers_and_persists() {
        let mut session = session();
        let id = session
            .create_chat("notes", model(), ChatConfig::default())
            .unwrap()
            .id()
            .to_string();
        assert_eq!(session.len(), 1);
        assert_eq!(session.chat(&id).unwrap().name(), "notes");
        assert_eq!(session.storage.read_all().unwrap().len(), 1);
    }

    #[test]
    fn bootstrap_reloads_persisted_chats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats.db");
        let id = {
            let mut session = Session::open(&path).unwrap();
            session
                .create_chat("kept", model(), ChatConfig::with_system("be terse"))
                .unwrap()
                .id()
                .to_string()
        };
        let session = Session::open(&path).unwrap();
        assert_eq!(session.len(), 1);
        let chat = session.chat(&id).unwrap();
        assert_eq!(chat.name(), "kept");
        assert_eq!(
            chat.config().system.as_ref().map(|m| m.content.as_str()),
            Some("be terse")
        );
    }

    #[test]
    fn remove_deletes_store_and_registry() {
        let mut session = session();
        let id = session
            .create_chat("gone", model(), ChatConfig::default())
            .unwrap()
            .id()
            .to_string();
        session.remove_chat(&id).unwrap();
        assert!(session.is_empty());
        assert!(session.storage.read_all().unwrap().is_empty());
        assert!(matches!(
            session.remove_chat(&id),
            Err(AppError::UnknownChat(_))
        ));
    }

    #[test]
    fn rename_is_persisted() {
        let mut session = session();
        let id = session
            .create_chat("draft", model(), ChatConfig::default())
            .unwrap()
            .id()
            .to_string();
        session.rename_chat(&id, "final").unwrap();
        assert_eq!(session.chat(&id).unwrap().name(), "final");
        assert_eq!(session.storage.read_all().unwrap()[0].record.name, "final");
    }

    #[test]
    fn config_change_is_persisted() {
        let mut session = session();
        let id = session
            .create_chat("c", model(), ChatConfig::default())
            .unwrap()
            .id()
            .to_string();
        session
            .set_chat_config(&id, ChatConfig::with_system("rules"))
            .unwrap();
        let stored = session.storage.read_all().unwrap();
        assert_eq!(stored[0].record.config.system.as_deref(), Some("rules"));
    }

    #[test]
    fn model_change_is_persisted() {
        let mut session = session();
        let id = session
            .create_chat("c", model(), ChatConfig::default())
            .unwrap()
            .id()
            .to_string();
        let swapped = Model::new("gpt-4o-mini", ProviderConfig::openai("http://localhost:8080"));
        session.set_chat_model(&id, swapped.clone()).unwrap();
        assert_eq!(session.chat(&id).unwrap().model(), &swapped);
        let stored = session.storage.read_all().unwrap();
        assert_eq!(stored[0].record.model, swapped);
    }

    #[tokio::test]
    async fn send_on_generic_provider_fails_without_stalling() {
        let mut session = session();
        let generic = Model::new(
            "base",
            ProviderConfig {
                name: ProviderKind::Generic,
                host: "http://localhost".to_string(),
            },
        );
        let id = session
            .create_chat("bad", generic, ChatConfig::default())
            .unwrap()
            .id()
            .to_string();
        let err = session.send(&id, "hello").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Provider(ProviderError::Unimplemented)
        ));
        let chat = session.chat(&id).unwrap();
        assert!(!chat.is_streaming());
        // the user message was appended and persisted before the failure
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].role, Role::User);
        let stored = session.storage.read_all().unwrap();
        assert_eq!(stored[0].record.messages.len(), 1);
    }

    #[tokio::test]
    async fn send_to_unknown_chat_errors() {
        let mut session = session();
        assert!(matches!(
            session.send("9", "hi").await,
            Err(AppError::UnknownChat(_))
        ));
    }

    #[test]
    fn ids_sort_by_key_order() {
        let mut session = session();
        for name in ["a", "b", "c"] {
            session.create_chat(name, model(), ChatConfig::default()).unwrap();
        }
        assert_eq!(session.ids(), vec!["1", "2", "3"]);
    }
}
