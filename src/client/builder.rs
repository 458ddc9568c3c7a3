use crate::{error::Result, Client, Library};

use super::{ClientOptions, ProtocolVersion};

pub struct ClientBuilder {
    client_id: Option<String>,
    clean_session: bool,
    options: ClientOptions,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            client_id: None,
            clean_session: true,
            options: ClientOptions::default(),
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.options.protocol = protocol;
        self
    }

    pub fn keep_alive(mut self, keep_alive: u16) -> Self {
        self.options.keep_alive = keep_alive;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.options.username = Some(username.into());
        self.options.password = password;
        self
    }

    pub fn build<U>(self, library: &Library, userdata: U) -> Result<Client<U>> {
        self.options.validate()?;

        let mut client =
            library.new_client(self.client_id.as_deref(), self.clean_session, userdata)?;
        client.set_options(self.options)?;

        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
