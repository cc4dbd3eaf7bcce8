//! Shared fixtures: a master file service listening on localhost and
//! workers connected to it over authenticated TCP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use termite_attr::AttributeCache;
use termite_cas::{ContentStore, FetchCoordinator, StoreConfig};
use termite_fs::{FsService, RemoteAttrSource, RemoteChunkSource, RemoteFs, WorkerService};
use termite_transport::{
    client_handshake, server_handshake, FrameConn, FrameListener, RpcPeer, RpcPeerConfig,
    SharedSecret,
};

#[allow(dead_code)]
pub struct Master {
    pub tmp: tempfile::TempDir,
    pub tree: PathBuf,
    pub service: Arc<FsService>,
    pub secret: Arc<SharedSecret>,
    pub addr: String,
    accept: tokio::task::JoinHandle<()>,
}

impl Drop for Master {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

pub async fn start_master() -> Master {
    let tmp = tempfile::tempdir().unwrap();
    let tree = tmp.path().join("tree");
    std::fs::create_dir_all(&tree).unwrap();
    let store = Arc::new(
        ContentStore::new(StoreConfig::new(tmp.path().join("master-cache"))).unwrap(),
    );
    let service = Arc::new(FsService::new(tree.clone(), store));
    let secret = Arc::new(SharedSecret::generate());

    let listener = FrameListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_service = service.clone();
    let accept_secret = secret.clone();
    let accept = tokio::spawn(async move {
        loop {
            let conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            match server_handshake(&conn, &accept_secret).await {
                Ok(origin) => {
                    let peer = Arc::new(RpcPeer::new(
                        conn,
                        accept_service.clone(),
                        RpcPeerConfig::default(),
                    ));
                    accept_service.register_worker(origin, peer);
                }
                Err(_) => continue,
            }
        }
    });

    Master {
        tmp,
        tree,
        service,
        secret,
        addr,
        accept,
    }
}

#[allow(dead_code)]
pub struct Worker {
    pub tmp: tempfile::TempDir,
    pub fs: RemoteFs,
    pub attrs: Arc<AttributeCache>,
    pub store: Arc<ContentStore>,
    pub peer: Arc<RpcPeer>,
}

pub async fn start_worker(master: &Master, origin: &str) -> Worker {
    let tmp = tempfile::tempdir().unwrap();
    let conn = FrameConn::dial(&master.addr).await.unwrap();
    client_handshake(&conn, &master.secret, origin).await.unwrap();

    let service = Arc::new(WorkerService::new());
    let peer = Arc::new(RpcPeer::new(conn, service.clone(), RpcPeerConfig::default()));

    let store = Arc::new(ContentStore::new(StoreConfig::new(tmp.path().join("cache"))).unwrap());
    let attrs = Arc::new(AttributeCache::new(Arc::new(RemoteAttrSource::new(
        peer.clone(),
        origin,
    ))));
    service.bind(attrs.clone());
    let fetcher = Arc::new(FetchCoordinator::new(store.clone()));
    let chunks = Arc::new(RemoteChunkSource::new(peer.clone()));
    let fs = RemoteFs::new(attrs.clone(), fetcher, chunks);

    // The master registers us right after the handshake; wait for it so
    // update pushes cannot miss this worker.
    for _ in 0..100 {
        if master
            .service
            .worker_origins()
            .iter()
            .any(|o| o == origin)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Worker {
        tmp,
        fs,
        attrs,
        store,
        peer,
    }
}
