//! Passive rule sets
//!
//! A passive rule set is a YAML file of detections run against responses
//! the scan already received. Nothing extra is sent.

use serde::{Deserialize, Serialize};

use crate::error::SignatureError;

/// A named group of passive rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Passive {
    pub name: String,
    pub desc: String,
    pub risk: String,
    pub confidence: String,
    /// Skipped when above the scan level
    pub level: u32,
    pub rules: Vec<PassiveRule>,
}

/// One passive check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassiveRule {
    pub id: String,
    pub risk: String,
    pub confidence: String,
    /// Short label shown with every hit
    pub reason: String,
    pub detections: Vec<String>,
}

impl Passive {
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, SignatureError> {
        let mut passive: Passive =
            serde_yaml::from_str(content).map_err(|e| SignatureError::ParseError {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;
        if passive.name.trim().is_empty() {
            return Err(SignatureError::MissingId(origin.to_string()));
        }
        if passive.level == 0 {
            passive.level = 1;
        }
        for rule in &mut passive.rules {
            if rule.risk.is_empty() {
                rule.risk = passive.risk.clone();
            }
            if rule.confidence.is_empty() {
                rule.confidence = passive.confidence.clone();
            }
        }
        Ok(passive)
    }

    /// Built-in rules catching common error pages
    pub fn defaults() -> Self {
        let rule = |id: &str, reason: &str, pattern: &str| PassiveRule {
            id: id.to_string(),
            risk: "Info".to_string(),
            confidence: "Tentative".to_string(),
            reason: reason.to_string(),
            detections: vec![format!("RegexSearch('resbody', '{}')", pattern)],
        };

        Passive {
            name: "Default".to_string(),
            desc: "Default rules for catching common errors".to_string(),
            risk: "Info".to_string(),
            confidence: "Tentative".to_string(),
            level: 1,
            rules: vec![
                rule(
                    "default-error-01",
                    "SQL Error",
                    r#"SQL syntax.*?MySQL|Warning.*?\Wmysqli?_|MySQLSyntaxErrorException|valid MySQL result|check the manual that corresponds to your (MySQL|MariaDB) server version|Unknown column [^ ]+ in .field list.|com\.mysql\.jdbc|PostgreSQL.*?ERROR|Warning.*?\Wpg_|valid PostgreSQL result|Npgsql\.|PG::SyntaxError:|org\.postgresql\.util\.PSQLException|ERROR:\s\ssyntax error at or near|\bORA-\d{5}|Oracle error|quoted string not properly terminated|SQL command not properly ended|oracle\.jdbc|Driver.*? SQL[-_ ]*Server|OLE DB.*? SQL Server|System\.Data\.SqlClient\.SqlException|Microsoft SQL Native Client error|ODBC SQL Server Driver|com\.microsoft\.sqlserver\.jdbc|Microsoft Access (\d+ )?Driver|JET Database Engine|SQLite/JDBCDriver|SQLite\.Exception|System\.Data\.SQLite\.SQLiteException|\[SQLITE_ERROR\]|SQLite error \d+:|sqlite3\.OperationalError:|DB2 SQL error|SQLSTATE.+SQLCODE|com\.ibm\.db2\.jcc|Dynamic SQL Error|Sybase message|com\.sybase\.jdbc"#,
                ),
                rule(
                    "default-error-02",
                    "General Error",
                    r#"stack smashing detected|Backtrace|Memory map|500 Internal Server Error|Traceback \(most recent call last\)|Fatal error:|Unhandled Exception|at [\w.$]+\([\w]+\.java:\d+\)"#,
                ),
                rule(
                    "default-error-03",
                    "PHP Error",
                    r#"Warning: include\(|Warning: unlink\(|for inclusion \(include_path=|fread\(|Failed opening required|Warning: file_get_contents\(|Fatal error: require_once\(|Warning: file_exists\("#,
                ),
                rule(
                    "default-error-04",
                    "Java Error",
                    r#"java\.io\.FileNotFoundException|java\.lang\.Exception|java\.lang\.IllegalArgumentException|java\.net\.MalformedURLException"#,
                ),
                rule(
                    "default-error-05",
                    "XML Error",
                    r#"simplexml_load_string|parser error :|xmlParseEntityDecl|xmlParseInternalSubset|DOCTYPE improperly terminated|Start tag expected|No declaration for attribute|No declaration for element|failed to load external entity|Malformed declaration expecting version|Content is not allowed in prolog|SAXParseException|XML Parsing Error|System\.Xml\.XPath\.XPathException|Unknown error in XPath|org\.apache\.xpath\.XPath"#,
                ),
                rule(
                    "default-error-06",
                    "RCE Error",
                    r#"root:.*:0:0:|(uid|gid|groups)=\d+|bytes from \b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b|Configuration File \(php\.ini\) Path |BROADCAST,MULTICAST|drwxr-xr|Active Internet connections|dir: cannot access|drwxrwxr|GNU/Linux"#,
                ),
            ],
        }
    }

    /// `name-ruleid`, lowercased, as matched by rule selection
    pub fn qualified_id(&self, rule: &PassiveRule) -> String {
        format!("{}-{}", self.name, rule.id).to_lowercase()
    }
}
