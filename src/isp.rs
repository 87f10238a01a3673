/// A network operator record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: u8,
    pub name: String,
    pub display: String,
}

impl Operator {
    pub fn new(id: u8, name: &str, display: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            display: display.to_string(),
        }
    }
}

/// Immutable operator lookup table.
///
/// Built once at startup and handed to whoever needs to classify servers.
#[derive(Debug, Clone)]
pub struct IspRegistry {
    known: Vec<Operator>,
    registry: Vec<Operator>,
    unknown: Operator,
}

impl Default for IspRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl IspRegistry {
    pub fn new(known: Vec<Operator>, registry: Vec<Operator>, unknown: Operator) -> Self {
        Self {
            known,
            registry,
            unknown,
        }
    }

    pub fn builtin() -> Self {
        let known = vec![
            Operator::new(1, "电信", "China Telecom"),
            Operator::new(2, "联通", "China Unicom"),
            Operator::new(3, "移动", "China Mobile"),
            Operator::new(4, "教育网", "CERNET"),
            Operator::new(5, "广电网", "China Broadnet"),
            Operator::new(6, "鹏博士", "Dr. Peng"),
        ];

        let mut registry = known.clone();
        registry.extend([
            Operator::new(7, "长城宽带", "Great Wall Broadband"),
            Operator::new(8, "方正宽带", "Founder Broadband"),
            Operator::new(9, "歌华有线", "Gehua CATV"),
            Operator::new(10, "华数", "Wasu"),
            Operator::new(11, "有线宽带", "Cable Broadband"),
            Operator::new(12, "中国电信", "China Telecom"),
            Operator::new(13, "中国联通", "China Unicom"),
            Operator::new(14, "中国移动", "China Mobile"),
        ]);

        Self::new(known, registry, Operator::new(0, "未知", "Unknown"))
    }

    pub fn unknown(&self) -> &Operator {
        &self.unknown
    }

    pub fn by_id(&self, id: u8) -> &Operator {
        self.registry
            .iter()
            .find(|op| op.id == id)
            .unwrap_or(&self.unknown)
    }

    /// Classifies by exact operator name, then by the longest registry name
    /// that `server_name` ends with.
    pub fn resolve(&self, isp: &str, server_name: &str) -> &Operator {
        if let Some(op) = self.known.iter().find(|op| op.name == isp) {
            return op;
        }

        self.registry
            .iter()
            .filter(|op| !op.name.is_empty() && server_name.ends_with(op.name.as_str()))
            .max_by_key(|op| op.name.len())
            .unwrap_or(&self.unknown)
    }
}

/// Directory entry as published by the GlobalSpeed server list.
#[derive(Debug, Clone, Default)]
pub struct ServerGlobal {
    pub id: u32,
    pub name: String,
    pub ip: String,
    pub port: String,
    pub prov: String,
    pub city: String,
    pub loc: String,
    pub isp: String,
}

impl ServerGlobal {
    pub fn operator<'a>(&self, registry: &'a IspRegistry) -> &'a Operator {
        registry.resolve(&self.isp, &self.name)
    }
}
