use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tree;
use super::{Limit, Query, ReplicatedStore, StoreError, WATCH_BUFFER, push_key};
use crate::clock::{Clock, SystemClock};
use crate::paths::{StorePaths, fields};

/// Applies one write to a document and publishes the result.
///
/// KEYS[1] document key, KEYS[2] collection index.
/// ARGV: op (set|update|incr), path inside the document, JSON payload,
/// change channel, document id, and '1' when the document is indexed.
const MUTATE_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)

local function resolve(v)
  if type(v) == 'table' then
    if v['.sv'] == 'timestamp' then return now end
    for k, child in pairs(v) do v[k] = resolve(child) end
  end
  return v
end

local function split(path)
  local segs = {}
  for seg in string.gmatch(path, '[^/]+') do table.insert(segs, seg) end
  return segs
end

local function is_empty(v)
  if v == nil or v == cjson.null then return true end
  if type(v) == 'table' then return next(v) == nil end
  return false
end

local function set_at(node, segs, i, value)
  if i > #segs then
    if is_empty(value) then return nil end
    return value
  end
  if type(node) ~= 'table' then
    if is_empty(value) then return node end
    node = {}
  end
  local child = set_at(node[segs[i]], segs, i + 1, value)
  if is_empty(child) then node[segs[i]] = nil else node[segs[i]] = child end
  return node
end

local function get_at(node, segs)
  for _, seg in ipairs(segs) do
    if type(node) ~= 'table' then return nil end
    node = node[seg]
  end
  return node
end

local doc = nil
local raw = redis.call('GET', KEYS[1])
if raw then doc = cjson.decode(raw) end

local op = ARGV[1]
local segs = split(ARGV[2])
local result = 0

if op == 'set' then
  doc = set_at(doc, segs, 1, resolve(cjson.decode(ARGV[3])))
elseif op == 'update' then
  for rel, value in pairs(cjson.decode(ARGV[3])) do
    local full = {}
    for _, s in ipairs(segs) do table.insert(full, s) end
    for s in string.gmatch(rel, '[^/]+') do table.insert(full, s) end
    doc = set_at(doc, full, 1, resolve(value))
  end
elseif op == 'incr' then
  local current = get_at(doc, segs)
  if type(current) ~= 'number' then current = 0 end
  result = current + tonumber(ARGV[3])
  doc = set_at(doc, segs, 1, result)
end

local indexed = ARGV[6] == '1'
if is_empty(doc) then
  redis.call('DEL', KEYS[1])
  if indexed then redis.call('ZREM', KEYS[2], ARGV[5]) end
  redis.call('PUBLISH', ARGV[4], 'null')
else
  local encoded = cjson.encode(doc)
  redis.call('SET', KEYS[1], encoded)
  if indexed then
    local score = 0
    if type(doc) == 'table' and type(doc['createdAt']) == 'number' then score = doc['createdAt'] end
    redis.call('ZADD', KEYS[2], score, ARGV[5])
  end
  redis.call('PUBLISH', ARGV[4], encoded)
end
return result
"#;

/// `collection/document/rest...` split of a store path. `part` names the
/// detached child that holds `rest`, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DocLocation {
    collection: String,
    document: String,
    part: Option<String>,
    rest: Vec<String>,
}

impl DocLocation {
    fn parse(path: &str) -> Result<Self, StoreError> {
        let segs = tree::segments(path);
        match segs.as_slice() {
            [collection, document, rest @ ..] => Ok(Self {
                collection: collection.to_string(),
                document: document.to_string(),
                part: None,
                rest: rest.iter().map(|s| s.to_string()).collect(),
            }),
            _ => Err(StoreError::Unsupported(format!(
                "'{}' is not inside a document (expected collection/document/...)",
                path
            ))),
        }
    }

    fn root(collection: &str, document: &str) -> Self {
        Self { collection: collection.to_string(), document: document.to_string(), part: None, rest: Vec::new() }
    }

    fn with_part(&self, part: &str) -> Self {
        Self { part: Some(part.to_string()), rest: Vec::new(), ..self.clone() }
    }

    fn is_document_root(&self) -> bool {
        self.part.is_none() && self.rest.is_empty()
    }

    /// `collection/document` or `collection/document/part`
    fn document_path(&self) -> String {
        match &self.part {
            Some(part) => format!("{}/{}/{}", self.collection, self.document, part),
            None => format!("{}/{}", self.collection, self.document),
        }
    }

    fn rest_path(&self) -> String {
        self.rest.join("/")
    }
}

/// Replicated store on top of Redis.
///
/// Each `collection/document` is one JSON string key. Writes run a Lua script
/// that applies the change, resolves server timestamps from `TIME`, keeps a
/// per-collection index sorted by `createdAt`, and publishes the new document
/// on the document's change channel. Watches subscribe to that channel.
///
/// Detached children (a session's player map and paint log) get their own key
/// and channel, so a state tick or paint push rewrites and publishes only that
/// child. Reads of a whole document stitch the children back in; a watch on a
/// document root sees the document without them.
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    namespace: String,
    mutate: Script,
    detached: Vec<(String, String)>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| StoreError::read(redis_url, e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::read(redis_url, e))?;
        info!("Connected replicated store to Redis namespace '{}'", namespace);

        let detached = [fields::PLAYERS, fields::PAINT]
            .iter()
            .map(|child| (StorePaths::SESSIONS.to_string(), child.to_string()))
            .collect();
        Ok(Self {
            client,
            conn,
            namespace: namespace.to_string(),
            mutate: Script::new(MUTATE_SCRIPT),
            detached,
        })
    }

    fn detached_children(&self, collection: &str) -> Vec<&str> {
        self.detached
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, child)| child.as_str())
            .collect()
    }

    fn is_detached(&self, collection: &str, child: &str) -> bool {
        self.detached.iter().any(|(c, d)| c == collection && d == child)
    }

    /// Splits `path` and moves a leading detached child into `part`
    fn locate(&self, path: &str) -> Result<DocLocation, StoreError> {
        let mut location = DocLocation::parse(path)?;
        if let Some(first) = location.rest.first() {
            if self.is_detached(&location.collection, first) {
                location.part = Some(location.rest.remove(0));
            }
        }
        Ok(location)
    }

    fn doc_key(&self, location: &DocLocation) -> String {
        format!("{}:doc:{}", self.namespace, location.document_path())
    }

    fn index_key(&self, collection: &str) -> String {
        format!("{}:index:{}", self.namespace, collection)
    }

    fn channel(&self, location: &DocLocation) -> String {
        format!("{}:changes:{}", self.namespace, location.document_path())
    }

    async fn run_mutation(&self, path: &str, op: &str, payload: String) -> Result<i64, StoreError> {
        let location = self.locate(path)?;
        self.mutate_at(&location, path, op, payload).await
    }

    async fn mutate_at(&self, location: &DocLocation, path: &str, op: &str, payload: String) -> Result<i64, StoreError> {
        let indexed = if location.part.is_none() { "1" } else { "0" };
        let mut conn = self.conn.clone();
        let result: i64 = self
            .mutate
            .key(self.doc_key(location))
            .key(self.index_key(&location.collection))
            .arg(op)
            .arg(location.rest_path())
            .arg(payload)
            .arg(self.channel(location))
            .arg(&location.document)
            .arg(indexed)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::write(path, e))?;
        Ok(result)
    }

    async fn load_document(&self, location: &DocLocation) -> Result<Option<Value>, StoreError> {
        let key = self.doc_key(location);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(|e| StoreError::read(&key, e))?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| StoreError::parse(&key, e)))
            .transpose()
    }

    /// Keys of a document followed by the keys of its detached children
    fn document_keys(&self, collection: &str, document: &str) -> Vec<String> {
        let root = DocLocation::root(collection, document);
        let mut keys = vec![self.doc_key(&root)];
        keys.extend(
            self.detached_children(collection)
                .into_iter()
                .map(|child| self.doc_key(&root.with_part(child))),
        );
        keys
    }

    /// Rebuilds a whole document from the raw values of [`Self::document_keys`]
    fn assemble(&self, collection: &str, document: &str, raws: Vec<Option<String>>) -> Result<Option<Value>, StoreError> {
        let key = self.doc_key(&DocLocation::root(collection, document));
        let mut raws = raws.into_iter();
        let mut assembled = raws
            .next()
            .flatten()
            .map(|raw| serde_json::from_str::<Value>(&raw).map_err(|e| StoreError::parse(&key, e)))
            .transpose()?;

        for (child, raw) in self.detached_children(collection).into_iter().zip(raws) {
            let Some(raw) = raw else { continue };
            let part: Value = serde_json::from_str(&raw).map_err(|e| StoreError::parse(&key, e))?;
            let document = assembled.get_or_insert_with(|| Value::Object(Map::new()));
            if let Some(fields) = document.as_object_mut() {
                fields.insert(child.to_string(), part);
            }
        }
        Ok(assembled)
    }

    async fn load_assembled(&self, collection: &str, document: &str) -> Result<Option<Value>, StoreError> {
        let keys = self.document_keys(collection, document);
        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::read(&keys[0], e))?;
        self.assemble(collection, document, raws)
    }

    async fn document_ids(&self, collection: &str, limit: Option<Limit>) -> Result<Vec<String>, StoreError> {
        let (start, stop) = match limit {
            Some(Limit::First(0)) | Some(Limit::Last(0)) => return Ok(Vec::new()),
            Some(Limit::First(n)) => (0, n as isize - 1),
            Some(Limit::Last(n)) => (-(n as isize), -1),
            None => (0, -1),
        };
        let key = self.index_key(collection);
        let mut conn = self.conn.clone();
        conn.zrange(&key, start, stop)
            .await
            .map_err(|e| StoreError::read(&key, e))
    }

    async fn load_collection(&self, collection: &str, ids: Vec<String>) -> Result<Map<String, Value>, StoreError> {
        let mut documents = Map::new();
        if ids.is_empty() {
            return Ok(documents);
        }
        let per_document = 1 + self.detached_children(collection).len();
        let keys: Vec<String> = ids.iter().flat_map(|id| self.document_keys(collection, id)).collect();
        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::read(collection, e))?;

        for (id, raws) in ids.into_iter().zip(raws.chunks(per_document)) {
            match self.assemble(collection, &id, raws.to_vec()) {
                Ok(Some(document)) => {
                    documents.insert(id, document);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping malformed document {}/{}: {}", collection, id, e),
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl ReplicatedStore for RedisStore {
    async fn set(&self, path: &str, mut value: Value) -> Result<(), StoreError> {
        let location = self.locate(path)?;
        if location.is_document_root() {
            // Children first, so a reader of the new document finds them in place
            for child in self.detached_children(&location.collection) {
                let part = value.as_object_mut().and_then(|fields| fields.remove(child)).unwrap_or(Value::Null);
                let payload = serde_json::to_string(&part).map_err(|e| StoreError::write(path, e))?;
                self.mutate_at(&location.with_part(child), path, "set", payload).await?;
            }
        }
        let payload = serde_json::to_string(&value).map_err(|e| StoreError::write(path, e))?;
        self.mutate_at(&location, path, "set", payload).await.map(|_| ())
    }

    async fn update(&self, path: &str, mut fields: Map<String, Value>) -> Result<(), StoreError> {
        if tree::segments(path).len() < 2 {
            // Fan a collection-level update out to the documents it touches
            for (field, value) in fields {
                self.set(&tree::join(path, &field), value).await?;
            }
            return Ok(());
        }
        let location = self.locate(path)?;
        if location.is_document_root() {
            let detached: Vec<String> = fields
                .keys()
                .filter(|field| {
                    let first = tree::segments(field).first().copied().unwrap_or_default();
                    self.is_detached(&location.collection, first)
                })
                .cloned()
                .collect();
            for field in detached {
                if let Some(value) = fields.remove(&field) {
                    self.set(&tree::join(path, &field), value).await?;
                }
            }
            if fields.is_empty() {
                return Ok(());
            }
        }
        let payload = serde_json::to_string(&Value::Object(fields)).map_err(|e| StoreError::write(path, e))?;
        self.run_mutation(path, "update", payload).await.map(|_| ())
    }

    async fn increment(&self, path: &str, delta: i64) -> Result<i64, StoreError> {
        self.run_mutation(path, "incr", delta.to_string()).await
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segs = tree::segments(path);
        match segs.as_slice() {
            [] => Err(StoreError::Unsupported("reading the store root".to_string())),
            [collection] => {
                let ids = self.document_ids(collection, None).await?;
                let documents = self.load_collection(collection, ids).await?;
                Ok((!documents.is_empty()).then_some(Value::Object(documents)))
            }
            [collection, document] => self.load_assembled(collection, document).await,
            [..] => {
                let location = self.locate(path)?;
                let document = self.load_document(&location).await?;
                let rest: Vec<&str> = location.rest.iter().map(String::as_str).collect();
                Ok(document.and_then(|doc| tree::get_segments(&doc, &rest).cloned()))
            }
        }
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = push_key(SystemClock.now_ms());
        self.set(&tree::join(path, &key), value).await?;
        Ok(key)
    }

    async fn query(&self, path: &str, query: &Query) -> Result<Vec<(String, Value)>, StoreError> {
        let segs = tree::segments(path);
        let indexed = query.order_by_child.as_deref() == Some("createdAt") && query.start_at.is_none();
        if let ([collection], true) = (segs.as_slice(), indexed) {
            let ids = self.document_ids(collection, query.limit).await?;
            let documents = self.load_collection(collection, ids).await?;
            return Ok(query.apply(Some(&Value::Object(documents))));
        }
        let node = self.get(path).await?;
        Ok(query.apply(node.as_ref()))
    }

    async fn server_time_ms(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let (secs, micros): (i64, i64) = redis::cmd("TIME")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::read("TIME", e))?;
        Ok(secs * 1000 + micros / 1000)
    }

    async fn watch(
        &self,
        path: &str,
        query: Option<Query>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Option<Value>>, StoreError> {
        let location = self.locate(path)?;
        let channel = self.channel(&location);

        // Subscribe before the initial read so no change falls in between
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::read(path, e))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| StoreError::read(path, e))?;
        let initial = self.load_document(&location).await?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let path = path.to_string();
        tokio::spawn(async move {
            let segs: Vec<&str> = location.rest.iter().map(String::as_str).collect();
            let mut last = tree::project(initial.as_ref(), &segs, query.as_ref());
            if tx.send(last.clone()).await.is_err() {
                return;
            }

            let mut messages = pubsub.on_message();
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = messages.next() => match msg {
                        Some(msg) => msg,
                        None => {
                            warn!("Change stream for '{}' closed by Redis", path);
                            break;
                        }
                    },
                };
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to read change payload on '{}': {}", channel, e);
                        continue;
                    }
                };
                let document = match serde_json::from_str::<Value>(&payload) {
                    Ok(Value::Null) => None,
                    Ok(document) => Some(document),
                    Err(e) => {
                        warn!("Dropping malformed change on '{}': {}", channel, e);
                        continue;
                    }
                };
                let current = tree::project(document.as_ref(), &segs, query.as_ref());
                if current != last {
                    if tx.send(current.clone()).await.is_err() {
                        break;
                    }
                    last = current;
                }
            }
            debug!("Watch on '{}' detached", path);
        });

        Ok(rx)
    }
}
