//! TCP echo server built on `rio`: accepts connections via io_uring and
//! spawns one coroutine per connection, each looping `recv`/`send` until the
//! peer closes or sends nothing.

use std::ffi::c_void;
use std::mem::size_of;
use std::net::SocketAddr;

fn listen(addr: SocketAddr) -> i32 {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert!(fd >= 0, "socket() failed: {}", std::io::Error::last_os_error());

        let one: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            size_of::<libc::c_int>() as u32,
        );

        let sockaddr = sockaddr_in_from(addr);
        let ret = libc::bind(
            fd,
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            size_of::<libc::sockaddr_in>() as u32,
        );
        assert_eq!(ret, 0, "bind() failed: {}", std::io::Error::last_os_error());

        let ret = libc::listen(fd, 128);
        assert_eq!(ret, 0, "listen() failed: {}", std::io::Error::last_os_error());
        fd
    }
}

fn sockaddr_in_from(addr: SocketAddr) -> libc::sockaddr_in {
    let SocketAddr::V4(addr) = addr else {
        panic!("only IPv4 listen addresses are supported");
    };
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(addr.ip().octets()) },
        sin_zero: [0; 8],
    }
}

async fn handle_connection(fd: i32) {
    let mut buf = [0u8; 4096];
    loop {
        let n = rio::io::recv(fd, &mut buf, 0).await;
        if n <= 0 {
            break;
        }
        let n = n as usize;
        let mut written = 0;
        while written < n {
            let w = rio::io::send(fd, &buf[written..n], 0).await;
            if w <= 0 {
                rio::io::close(fd).await;
                return;
            }
            written += w as usize;
        }
    }
    rio::io::close(fd).await;
}

fn main() {
    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7070".to_string())
        .parse()
        .expect("usage: echo [ADDR:PORT]");

    let listener_fd = listen(addr);
    eprintln!("rio-echo: listening on {addr}");

    let ctx = rio::Context::builder().build().expect("failed to build context");
    ctx.spawn(async move {
        loop {
            let conn_fd = rio::io::accept(listener_fd, 0).await;
            if conn_fd < 0 {
                eprintln!("rio-echo: accept failed: {conn_fd}");
                continue;
            }
            rio::spawn(handle_connection(conn_fd));
        }
    });

    // The acceptor loop never returns; drive the worker directly on the
    // main thread rather than handing it off to its own.
    ctx.run();
}
