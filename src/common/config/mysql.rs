use sqlx::mysql::MySqlConnectOptions;

/// Account the temporary-database allocator connects as
pub(crate) const ADMIN_USER: &str = "root";

/// Where and which database to connect to
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database to select on connect, empty for none
    pub database_name: String,
    /// Server credentials and address, `None` until provisioned
    pub mysql: Option<MySqlConfig>,
}

impl DatabaseConfig {
    /// Creates a configuration for `database_name` on the given server
    #[must_use]
    pub fn new(database_name: impl Into<String>, mysql: MySqlConfig) -> Self {
        Self {
            database_name: database_name.into(),
            mysql: Some(mysql),
        }
    }
}

/// ``MySQL`` server credentials and address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MySqlConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: String,
}

impl MySqlConfig {
    const DEFAULT_USER: &'static str = "app";
    const DEFAULT_PASSWORD: &'static str = "secret";
    const DEFAULT_HOST: &'static str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 3306;

    /// Creates a new ``MySQL`` configuration with defaults
    /// # Example
    /// ```
    /// # use mysql_testdb::MySqlConfig;
    /// #
    /// let config = MySqlConfig::new();
    /// assert_eq!(config.address(), "127.0.0.1:3306");
    /// ```
    /// # Defaults
    /// - User: app
    /// - Password: secret
    /// - Host: 127.0.0.1
    /// - Port: 3306
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_owned(),
            port: Self::DEFAULT_PORT,
            user: Self::DEFAULT_USER.to_owned(),
            password: Self::DEFAULT_PASSWORD.to_owned(),
        }
    }

    /// Sets a new application user
    #[must_use]
    pub fn user(self, value: String) -> Self {
        Self {
            user: value,
            ..self
        }
    }

    /// Sets a new password, shared by the application user and root
    #[must_use]
    pub fn password(self, value: String) -> Self {
        Self {
            password: value,
            ..self
        }
    }

    /// Sets a new host
    #[must_use]
    pub fn host(self, value: String) -> Self {
        Self {
            host: value,
            ..self
        }
    }

    /// Sets a new port
    #[must_use]
    pub fn port(self, value: u16) -> Self {
        Self {
            port: value,
            ..self
        }
    }

    /// Application user
    #[must_use]
    pub fn get_user(&self) -> &str {
        &self.user
    }

    /// Server address as `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fills a blank user or password with the defaults
    #[must_use]
    pub(crate) fn with_defaults(self) -> Self {
        let user = if self.user.is_empty() {
            Self::DEFAULT_USER.to_owned()
        } else {
            self.user
        };
        let password = if self.password.is_empty() {
            Self::DEFAULT_PASSWORD.to_owned()
        } else {
            self.password
        };
        Self {
            user,
            password,
            ..self
        }
    }

    /// Connection URL for logging, with the password redacted
    pub(crate) fn connection_url(&self, db_name: &str) -> String {
        let Self {
            host, port, user, ..
        } = self;
        format!("mysql://{user}:***@{host}:{port}/{db_name}")
    }

    pub(crate) fn database_connect_options(&self, db_name: &str) -> MySqlConnectOptions {
        let opts = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .charset("utf8mb4");
        if db_name.is_empty() {
            opts
        } else {
            opts.database(db_name)
        }
    }

    pub(crate) fn privileged_connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(ADMIN_USER)
            .password(&self.password)
            .charset("utf8mb4")
    }
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self::new()
    }
}
